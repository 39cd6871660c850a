//! Native library records and the platform-facing traits.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Mutex,
    },
};

use strum::Display;

use crate::{domain::DomainId, Result};

/// Lifecycle of a native library record.
///
/// `Unloaded -> Loading -> Loaded -> Unloading -> Unloaded`; a failed open goes straight from
/// `Loading` back to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u8)]
pub enum LibraryState {
    /// No handle is open
    #[strum(serialize = "unloaded")]
    Unloaded = 0,
    /// The platform loader is running, possibly re-entering the manager
    #[strum(serialize = "loading")]
    Loading = 1,
    /// The library is open and registered
    #[strum(serialize = "loaded")]
    Loaded = 2,
    /// The handle is being closed
    #[strum(serialize = "unloading")]
    Unloading = 3,
}

impl LibraryState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LibraryState::Loading,
            2 => LibraryState::Loaded,
            3 => LibraryState::Unloading,
            _ => LibraryState::Unloaded,
        }
    }
}

/// An open platform library.
pub trait NativeHandle: Send + Sync {
    /// Address of the exported symbol `symbol`, if present.
    fn find(&self, symbol: &str) -> Option<usize>;

    /// Close the handle.
    ///
    /// # Errors
    /// Returns [`crate::Error::LibraryOpen`] if the platform refuses to close it.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens platform libraries.
pub trait NativeOpener: Send + Sync {
    /// The canonical name a library is registered under.
    ///
    /// Two names that resolve to the same canonical name are the same library for locking and
    /// cross-domain exclusivity.
    fn resolve(&self, name: &str) -> String {
        name.to_string()
    }

    /// Open the library registered as `resolved`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LibraryOpen`] when the platform loader fails.
    fn open(&self, resolved: &str) -> Result<Box<dyn NativeHandle>>;
}

/// One native library as loaded by one domain.
pub struct NativeLibrary {
    name: String,
    owner: DomainId,
    auto_unload: bool,
    state: AtomicU8,
    handle: Mutex<Option<Box<dyn NativeHandle>>>,
}

impl NativeLibrary {
    pub(crate) fn new(name: String, owner: DomainId, auto_unload: bool) -> Self {
        NativeLibrary {
            name,
            owner,
            auto_unload,
            state: AtomicU8::new(LibraryState::Unloaded as u8),
            handle: Mutex::new(None),
        }
    }

    /// The canonical library name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain that loaded the library.
    #[must_use]
    pub fn owner(&self) -> DomainId {
        self.owner
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LibraryState {
        LibraryState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Whether the library unloads together with its domain.
    #[must_use]
    pub fn is_auto_unload(&self) -> bool {
        self.auto_unload
    }

    /// Address of `symbol` in this library.
    #[must_use]
    pub fn find(&self, symbol: &str) -> Option<usize> {
        lock!(self.handle).as_ref()?.find(symbol)
    }

    pub(crate) fn set_state(&self, state: LibraryState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn install(&self, handle: Box<dyn NativeHandle>) {
        *lock!(self.handle) = Some(handle);
    }

    /// Close the handle and return to [`LibraryState::Unloaded`].
    pub(crate) fn release(&self) -> Result<()> {
        self.set_state(LibraryState::Unloading);
        let handle = lock!(self.handle).take();
        let result = handle.map_or(Ok(()), |handle| handle.close());
        self.set_state(LibraryState::Unloaded);
        result
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("auto_unload", &self.auto_unload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::FakeHandle;

    #[test]
    fn test_lifecycle() {
        let library = NativeLibrary::new("z".to_string(), DomainId::next(), false);
        assert_eq!(library.state(), LibraryState::Unloaded);
        assert_eq!(library.find("deflate"), None);

        library.set_state(LibraryState::Loading);
        library.install(Box::new(FakeHandle::new(["deflate"])));
        library.set_state(LibraryState::Loaded);
        assert!(library.find("deflate").is_some());
        assert_eq!(library.find("inflate"), None);

        library.release().unwrap();
        assert_eq!(library.state(), LibraryState::Unloaded);
        assert_eq!(library.find("deflate"), None);
        assert_eq!(LibraryState::Loaded.to_string(), "loaded");
    }
}
