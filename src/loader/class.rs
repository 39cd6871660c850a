//! Materialized classes and the hook that produces them.

use std::sync::Arc;

use crate::{domain::DomainId, location::Location, Result};

/// A class materialized by a [`crate::loader::ModuleLoader`].
///
/// A class belongs to exactly one domain; two domains that read the same bytes produce two
/// distinct classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedClass {
    name: String,
    domain: DomainId,
    module: Option<String>,
    source: Location,
    bytes: Arc<[u8]>,
}

impl DefinedClass {
    /// Create a class record.
    pub fn new(
        name: impl Into<String>,
        domain: DomainId,
        module: Option<String>,
        source: Location,
        bytes: Arc<[u8]>,
    ) -> Self {
        DefinedClass {
            name: name.into(),
            domain,
            module,
            source,
            bytes,
        }
    }

    /// The binary name, e.g. `com.example.Main`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The defining domain.
    #[must_use]
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// The defining module, or `None` for classes found on the search path.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Where the compiled form was read from.
    #[must_use]
    pub fn source(&self) -> &Location {
        &self.source
    }

    /// The compiled form.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Everything a [`ClassMaterializer`] gets to see about a class being defined.
#[derive(Debug, Clone, Copy)]
pub struct ClassDefinition<'a> {
    /// The binary name
    pub name: &'a str,
    /// The defining domain
    pub domain: DomainId,
    /// The defining module, `None` for search path classes
    pub module: Option<&'a str>,
    /// Where the bytes came from
    pub source: &'a Location,
    /// The compiled form
    pub bytes: &'a [u8],
}

/// Turns compiled bytes into a [`DefinedClass`].
///
/// Runs while the loader holds the per-name lock for the class, so an implementation never sees
/// two concurrent definitions of one name in one domain. A failure propagates to the caller of
/// the lookup unchanged.
pub trait ClassMaterializer: Send + Sync {
    /// Materialize `definition`.
    ///
    /// # Errors
    /// Returns whatever error rejects the bytes (for example a failed verification).
    fn materialize(&self, definition: ClassDefinition<'_>) -> Result<DefinedClass>;
}

/// Keeps the compiled form as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainBytes;

impl ClassMaterializer for RetainBytes {
    fn materialize(&self, definition: ClassDefinition<'_>) -> Result<DefinedClass> {
        Ok(DefinedClass::new(
            definition.name,
            definition.domain,
            definition.module.map(str::to_string),
            definition.source.clone(),
            Arc::from(definition.bytes),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_bytes() {
        let domain = DomainId::next();
        let source = Location::Module {
            module: "m".to_string(),
            entry: "a/B.class".to_string(),
        };

        let class = RetainBytes
            .materialize(ClassDefinition {
                name: "a.B",
                domain,
                module: Some("m"),
                source: &source,
                bytes: &[0xCA, 0xFE],
            })
            .unwrap();

        assert_eq!(class.name(), "a.B");
        assert_eq!(class.domain(), domain);
        assert_eq!(class.module(), Some("m"));
        assert_eq!(class.bytes(), &[0xCA, 0xFE]);
        assert_eq!(class.source(), &source);
    }
}
