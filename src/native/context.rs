//! Per-thread stack of libraries whose load is in progress.
//!
//! Platform loaders run library initialization code, which may call back into the manager (a
//! nested load) or ask which domain is loading (symbol resolution for the initializer). The
//! stack answers both without any cross-thread state.

use std::{cell::RefCell, sync::Arc};

use crate::{domain::DomainId, native::library::NativeLibrary};

thread_local! {
    static LOADING: RefCell<Vec<Arc<NativeLibrary>>> = const { RefCell::new(Vec::new()) };
}

/// Pushes a library on the calling thread's loading stack for the guard's lifetime.
pub(crate) struct LoadingScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl LoadingScope {
    pub(crate) fn enter(library: Arc<NativeLibrary>) -> Self {
        LOADING.with(|stack| stack.borrow_mut().push(library));
        LoadingScope {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for LoadingScope {
    fn drop(&mut self) {
        LOADING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The in-progress load of `name` on this thread, innermost first.
pub(crate) fn in_progress(name: &str) -> Option<Arc<NativeLibrary>> {
    LOADING.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|library| library.name() == name)
            .cloned()
    })
}

/// The domain whose library load is running on the calling thread, if any.
///
/// Symbol-resolution callbacks invoked by a library initializer use this to find the domain
/// that is loading the library.
#[must_use]
pub fn current_loading_domain() -> Option<DomainId> {
    LOADING.with(|stack| stack.borrow().last().map(|library| library.owner()))
}

/// Depth of the calling thread's loading stack.
#[must_use]
pub fn loading_depth() -> usize {
    LOADING.with(|stack| stack.borrow().len())
}
