//! Deferred values for single-threaded code.
//!
//! A [`Deferred`] holds a value that is not known yet. Attach continuations
//! with [`then`](Deferred::then), [`catch`](Deferred::catch) and
//! [`finally`](Deferred::finally); each returns a new `Deferred` for the
//! continuation's own outcome. Continuations always run later, from the
//! [`Schedule`] the deferred was created with, in the order they were
//! attached.
//!
//! # Examples
//!
//! ```
//! use deferred::{resolve, MicrotaskQueue};
//! use std::{cell::Cell, rc::Rc};
//!
//! let queue = MicrotaskQueue::new();
//! let logged = Rc::new(Cell::new(0));
//! let l = logged.clone();
//! let chain = resolve::<i32, String>(queue.clone(), 1)
//!     .then(|v| Ok(v + 1))
//!     .finally(move || {
//!         l.set(l.get() + 1);
//!         Ok(())
//!     });
//! assert_eq!(logged.get(), 0);
//! queue.run_until_stalled();
//! assert_eq!(logged.get(), 1);
//! assert_eq!(chain.outcome(), Some(Ok(2)));
//! ```
pub mod combinators;
pub mod deferred;
pub mod scheduler;
pub mod waiter;

pub use combinators::{all, all_settled, race, reject, resolve, resolve_thenable};
pub use deferred::{BoxedResolver, Deferred, Handler, SettleErr, SettleOk, Status};
pub use scheduler::{EventLoop, MicrotaskQueue, Schedule, Task};
pub use waiter::Waiter;

/// Errors raised by this crate itself. Rejection reasons are the caller's
/// own `E` and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("a deferred needs a resolver")]
    InvalidResolver,
    #[error("deferred was dropped before it settled")]
    Abandoned,
}

/// Anything that can report a fulfillment or rejection to callbacks, which
/// is all the combinators need from their inputs.
///
/// A thenable calls at most one of the two callbacks, at most once. It may
/// do so synchronously from `attach` or at any later point.
pub trait Thenable<T, E> {
    fn attach(self, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>);
}
