//! Platform-free stand-ins for native libraries.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    native::{NativeHandle, NativeOpener},
    Error, Result,
};

/// Called with the library name while a [`FakeOpener`] is opening it.
pub type OpenHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A handle exporting a fixed set of symbols.
pub struct FakeHandle {
    symbols: BTreeSet<String>,
    closes: Option<Arc<AtomicUsize>>,
}

impl FakeHandle {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FakeHandle {
            symbols: symbols.into_iter().map(Into::into).collect(),
            closes: None,
        }
    }
}

impl NativeHandle for FakeHandle {
    fn find(&self, symbol: &str) -> Option<usize> {
        self.symbols
            .iter()
            .position(|known| known == symbol)
            .map(|position| 0x1000 + position * 0x10)
    }

    fn close(self: Box<Self>) -> Result<()> {
        if let Some(closes) = &self.closes {
            closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Opens [`FakeHandle`]s, counting opens and closes.
pub struct FakeOpener {
    symbols: Vec<String>,
    failing: BTreeSet<String>,
    hook: Mutex<Option<OpenHook>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeOpener {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FakeOpener {
            symbols: symbols.into_iter().map(Into::into).collect(),
            failing: BTreeSet::new(),
            hook: Mutex::new(None),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make opening any of `names` fail.
    pub fn failing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(names.into_iter().map(Into::into));
        self
    }

    /// Run `hook` inside every subsequent open, before the handle is returned.
    pub fn set_hook(&self, hook: OpenHook) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl NativeOpener for FakeOpener {
    fn open(&self, resolved: &str) -> Result<Box<dyn NativeHandle>> {
        if self.failing.contains(resolved) {
            return Err(Error::LibraryOpen {
                library: resolved.to_string(),
                message: "simulated failure".to_string(),
            });
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(resolved);
        }

        Ok(Box::new(FakeHandle {
            symbols: self.symbols.iter().cloned().collect(),
            closes: Some(Arc::clone(&self.closes)),
        }))
    }
}
