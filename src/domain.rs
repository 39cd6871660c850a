//! Loading domains and their identities.
//!
//! A domain is an isolated loading context. Every [`crate::loader::ModuleLoader`] owns exactly
//! one [`Domain`]; the native library manager and the keyed value cache only ever see the
//! domain's identity, which keeps both services free of any dependency on the loader itself.
//!
//! # Key Components
//!
//! - [`DomainId`] - Process-unique, copyable identity
//! - [`DomainKind`] - The small closed set of domain flavors
//! - [`Domain`] - Identity, display name and flavor of one domain

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use strum::{Display, EnumIter};

static NEXT_DOMAIN_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a loading domain.
///
/// Identities are never reused within a process, so a stale id held by a cache or a native
/// library record can never be confused with a newer domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u32);

impl DomainId {
    /// Allocate a fresh identity.
    #[must_use]
    pub fn next() -> Self {
        DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identity value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The flavor of a loading domain.
///
/// The three system flavors live for the whole process and are never reclaimed; their native
/// libraries therefore never unload automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DomainKind {
    /// The root domain; it has no parent and serves as the last delegation stop
    #[strum(serialize = "boot")]
    Boot,
    /// System domain for platform modules
    #[strum(serialize = "platform")]
    Platform,
    /// System domain for the application path and application modules
    #[strum(serialize = "application")]
    Application,
    /// One domain per module, created by a [`crate::loader::LoaderPool`]
    #[strum(serialize = "pooled")]
    Pooled,
    /// Any other dynamically created domain
    #[strum(serialize = "custom")]
    Custom,
}

impl DomainKind {
    /// Whether domains of this flavor can be reclaimed before process teardown.
    #[must_use]
    pub fn is_reclaimable(self) -> bool {
        matches!(self, DomainKind::Pooled | DomainKind::Custom)
    }
}

/// Identity, name and flavor of one loading domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain {
    id: DomainId,
    name: String,
    kind: DomainKind,
}

impl Domain {
    /// Create a domain with a freshly allocated identity.
    pub fn new(name: impl Into<String>, kind: DomainKind) -> Self {
        Domain {
            id: DomainId::next(),
            name: name.into(),
            kind,
        }
    }

    /// The process-unique identity.
    #[must_use]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// The display name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The flavor of this domain.
    #[must_use]
    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    /// Whether this domain can be reclaimed before process teardown.
    #[must_use]
    pub fn is_reclaimable(&self) -> bool {
        self.kind.is_reclaimable()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_ids_are_unique() {
        let a = Domain::new("a", DomainKind::Custom);
        let b = Domain::new("a", DomainKind::Custom);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_only_dynamic_kinds_are_reclaimable() {
        let reclaimable: Vec<_> = DomainKind::iter().filter(|k| k.is_reclaimable()).collect();
        assert_eq!(reclaimable, vec![DomainKind::Pooled, DomainKind::Custom]);
    }

    #[test]
    fn test_display() {
        let domain = Domain::new("app", DomainKind::Application);
        let text = domain.to_string();
        assert!(text.starts_with("app (application #"));
    }
}
