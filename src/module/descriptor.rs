//! Immutable module descriptors.
//!
//! A [`ModuleDescriptor`] names a module, lists the packages it contains and declares which of
//! them are exported (visible to code in other modules) and opened (their resources visible to
//! other modules). Exports and opens are either unqualified or qualified to a set of target
//! module names.

use std::collections::BTreeSet;

use bitflags::bitflags;

use crate::{Error, Result};

bitflags! {
    /// Module-level modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleFlags: u8 {
        /// Every package is opened unconditionally
        const OPEN = 0x01;
        /// Every package is exported and opened unconditionally
        const AUTOMATIC = 0x02;
        /// The module was not declared in source
        const SYNTHETIC = 0x04;
    }
}

/// An exported or opened package, optionally restricted to target modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageAccess {
    package: String,
    targets: BTreeSet<String>,
}

impl PackageAccess {
    /// The package name.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Target modules; empty for an unqualified declaration.
    #[must_use]
    pub fn targets(&self) -> &BTreeSet<String> {
        &self.targets
    }

    /// Whether the declaration applies to every module.
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Whether the declaration applies to the module `reader`.
    #[must_use]
    pub fn applies_to(&self, reader: &str) -> bool {
        !self.is_qualified() || self.targets.contains(reader)
    }
}

/// Immutable description of a module.
///
/// # Examples
///
/// ```rust
/// use modloader::module::ModuleDescriptor;
///
/// let descriptor = ModuleDescriptor::builder("com.example.core")
///     .package("com.example.core.internal")
///     .exports("com.example.core")
///     .exports_to("com.example.core.spi", ["com.example.plugin"])
///     .opens("com.example.core")
///     .build()?;
///
/// assert!(descriptor.contains("com.example.core.internal"));
/// assert!(descriptor.is_exported_to("com.example.core.spi", "com.example.plugin"));
/// assert!(!descriptor.is_exported_to("com.example.core.spi", "other"));
/// assert!(descriptor.opens_unconditionally("com.example.core"));
/// # Ok::<(), modloader::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    flags: ModuleFlags,
    packages: BTreeSet<String>,
    exports: Vec<PackageAccess>,
    opens: Vec<PackageAccess>,
}

impl ModuleDescriptor {
    /// Start building a descriptor for the module `name`.
    pub fn builder(name: impl Into<String>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder {
            name: name.into(),
            flags: ModuleFlags::empty(),
            packages: BTreeSet::new(),
            exports: Vec::new(),
            opens: Vec::new(),
        }
    }

    /// The module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module modifiers.
    #[must_use]
    pub fn flags(&self) -> ModuleFlags {
        self.flags
    }

    /// Whether the whole module is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.flags.contains(ModuleFlags::OPEN)
    }

    /// Whether the module is automatic (exports and opens everything).
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        self.flags.contains(ModuleFlags::AUTOMATIC)
    }

    /// Every package contained in the module.
    #[must_use]
    pub fn packages(&self) -> &BTreeSet<String> {
        &self.packages
    }

    /// Whether the module contains `package`.
    #[must_use]
    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// Export declarations.
    #[must_use]
    pub fn exports(&self) -> &[PackageAccess] {
        &self.exports
    }

    /// Open declarations.
    #[must_use]
    pub fn opens(&self) -> &[PackageAccess] {
        &self.opens
    }

    /// Whether `package` is exported to the module named `reader`.
    #[must_use]
    pub fn is_exported_to(&self, package: &str, reader: &str) -> bool {
        if self.is_automatic() {
            return self.contains(package);
        }
        self.exports
            .iter()
            .any(|export| export.package == package && export.applies_to(reader))
    }

    /// Packages whose code is visible to the module named `reader`.
    pub fn packages_visible_to<'a>(&'a self, reader: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        if self.is_automatic() {
            Box::new(self.packages.iter().map(String::as_str))
        } else {
            Box::new(
                self.exports
                    .iter()
                    .filter(move |export| export.applies_to(reader))
                    .map(|export| export.package.as_str()),
            )
        }
    }

    /// Whether resources of `package` are visible to every module.
    #[must_use]
    pub fn opens_unconditionally(&self, package: &str) -> bool {
        if self.is_open() || self.is_automatic() {
            return self.contains(package);
        }
        self.opens
            .iter()
            .any(|open| open.package == package && !open.is_qualified())
    }
}

/// Builder for [`ModuleDescriptor`].
///
/// Exported and opened packages are added to the contained packages automatically.
#[derive(Debug, Clone)]
pub struct ModuleDescriptorBuilder {
    name: String,
    flags: ModuleFlags,
    packages: BTreeSet<String>,
    exports: Vec<PackageAccess>,
    opens: Vec<PackageAccess>,
}

impl ModuleDescriptorBuilder {
    /// Add a contained, non-exported package.
    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.packages.insert(package.into());
        self
    }

    /// Export `package` to every module.
    #[must_use]
    pub fn exports(self, package: impl Into<String>) -> Self {
        self.exports_to(package, std::iter::empty::<String>())
    }

    /// Export `package` to the listed modules only.
    #[must_use]
    pub fn exports_to<I, S>(mut self, package: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let access = Self::access(package, targets);
        self.packages.insert(access.package.clone());
        self.exports.push(access);
        self
    }

    /// Open `package` to every module.
    #[must_use]
    pub fn opens(self, package: impl Into<String>) -> Self {
        self.opens_to(package, std::iter::empty::<String>())
    }

    /// Open `package` to the listed modules only.
    #[must_use]
    pub fn opens_to<I, S>(mut self, package: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let access = Self::access(package, targets);
        self.packages.insert(access.package.clone());
        self.opens.push(access);
        self
    }

    /// Mark the module open.
    #[must_use]
    pub fn open(mut self) -> Self {
        self.flags |= ModuleFlags::OPEN;
        self
    }

    /// Mark the module automatic.
    #[must_use]
    pub fn automatic(mut self) -> Self {
        self.flags |= ModuleFlags::AUTOMATIC;
        self
    }

    /// Mark the module synthetic.
    #[must_use]
    pub fn synthetic(mut self) -> Self {
        self.flags |= ModuleFlags::SYNTHETIC;
        self
    }

    /// Finish the descriptor.
    ///
    /// # Errors
    /// Returns [`Error::Error`] for an empty module name, an empty package name, or a package
    /// exported (or opened) twice.
    pub fn build(self) -> Result<ModuleDescriptor> {
        if self.name.is_empty() {
            return Err(Error::Error("Module name must not be empty".to_string()));
        }
        if self.packages.iter().any(String::is_empty) {
            return Err(Error::Error(format!(
                "Module {} declares the unnamed package",
                self.name
            )));
        }
        for (kind, list) in [("exported", &self.exports), ("opened", &self.opens)] {
            let mut seen = BTreeSet::new();
            for access in list {
                if !seen.insert(access.package.as_str()) {
                    return Err(Error::Error(format!(
                        "Package {} is {} twice by module {}",
                        access.package, kind, self.name
                    )));
                }
            }
        }

        Ok(ModuleDescriptor {
            name: self.name,
            flags: self.flags,
            packages: self.packages,
            exports: self.exports,
            opens: self.opens,
        })
    }

    fn access<I, S>(package: impl Into<String>, targets: I) -> PackageAccess
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PackageAccess {
            package: package.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports_add_packages() {
        let descriptor = ModuleDescriptor::builder("m")
            .exports("a")
            .opens_to("b", ["other"])
            .build()
            .unwrap();

        assert!(descriptor.contains("a"));
        assert!(descriptor.contains("b"));
        assert!(!descriptor.opens_unconditionally("b"));
        assert!(descriptor.is_exported_to("a", "anyone"));
    }

    #[test]
    fn test_open_and_automatic() {
        let open = ModuleDescriptor::builder("m").package("p").open().build().unwrap();
        assert!(open.opens_unconditionally("p"));
        assert!(!open.is_exported_to("p", "x"));

        let automatic = ModuleDescriptor::builder("auto")
            .package("p")
            .package("q")
            .automatic()
            .build()
            .unwrap();
        assert!(automatic.is_exported_to("q", "x"));
        let visible: Vec<_> = automatic.packages_visible_to("x").collect();
        assert_eq!(visible, vec!["p", "q"]);
    }

    #[test]
    fn test_qualified_visibility() {
        let descriptor = ModuleDescriptor::builder("m")
            .exports("pub")
            .exports_to("friend", ["f"])
            .build()
            .unwrap();

        let for_f: Vec<_> = descriptor.packages_visible_to("f").collect();
        let for_g: Vec<_> = descriptor.packages_visible_to("g").collect();
        assert_eq!(for_f, vec!["pub", "friend"]);
        assert_eq!(for_g, vec!["pub"]);
    }

    #[test]
    fn test_invalid_descriptors() {
        assert!(ModuleDescriptor::builder("").build().is_err());
        assert!(ModuleDescriptor::builder("m").package("").build().is_err());
        assert!(ModuleDescriptor::builder("m")
            .exports("a")
            .exports("a")
            .build()
            .is_err());
    }
}
