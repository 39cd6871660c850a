//! Access checks applied to every location a search path returns.

use crate::{location::Location, Result};

/// Decides whether a found location may be handed out.
///
/// A denial, or an error raised by the check, makes the location invisible; the lookup then
/// continues with the next path entry.
pub trait AccessCheck: Send + Sync {
    /// Returns `Ok(true)` when `location` may be returned.
    ///
    /// # Errors
    /// Any error is treated like a denial.
    fn check(&self, location: &Location) -> Result<bool>;
}

/// Permits every location.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessCheck for AllowAll {
    fn check(&self, _location: &Location) -> Result<bool> {
        Ok(true)
    }
}

impl<F> AccessCheck for F
where
    F: Fn(&Location) -> Result<bool> + Send + Sync,
{
    fn check(&self, location: &Location) -> Result<bool> {
        self(location)
    }
}

pub(crate) fn permitted(check: &dyn AccessCheck, location: &Location) -> bool {
    match check.check(location) {
        Ok(allowed) => allowed,
        Err(error) => {
            tracing::debug!(%location, %error, "access check failed");
            false
        }
    }
}
