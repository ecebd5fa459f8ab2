//! Timed event scheduler.
//!
//! The primitive is "wait N milliseconds, cooperatively, cancellable". Every
//! wait is owned by a [`TeardownScope`]; closing the scope invalidates the
//! wait's [`CancelToken`] and a cancelled wait resolves to `Err(Cancelled)`
//! instead of resuming its continuation. Stage scripts chain waits with `?`:
//!
//! ```ignore
//! scope.after(Duration::from_millis(500)).await?;
//! emit("Inicializando...");
//! scope.after(Duration::from_millis(2000)).await?;
//! ```

mod scope;
mod token;
mod wait;

pub use scope::TeardownScope;
pub use token::CancelToken;
pub use wait::ScheduledWait;

use thiserror::Error;

/// A wait (or any scoped suspension) was invalidated before it fired.
///
/// Expected during stage transitions and teardown; not a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("wait cancelled before firing")]
pub struct Cancelled;
