//! Deferred values with externally triggered completion.
//!
//! A [`Deferred`] starts pending and is settled exactly once by whoever holds
//! it, through [`Deferred::resolve`] or [`Deferred::reject`]. Continuations are
//! attached with [`Deferred::then`] or built with the combinators
//! [`chain`](Deferred::chain), [`trap`](Deferred::trap),
//! [`always`](Deferred::always) and [`group`].
//!
//! Settlement never runs inline: the state change and the queued handlers run
//! on a later turn of the [`Scheduler`] held by the [`Context`]. Handlers
//! attached after settlement run immediately instead.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::{Context, TurnQueue};
//! use std::{cell::Cell, rc::Rc};
//!
//! let queue = Rc::new(TurnQueue::new());
//! let ctx = Context::new(queue.clone());
//! let seen = Rc::new(Cell::new(0));
//!
//! let source = ctx.deferred::<u32, String>();
//! let sink = seen.clone();
//! source
//!     .chain(|value| Ok(value * 2))
//!     .on_fulfilled(move |doubled| sink.set(*doubled));
//!
//! source.resolve(21).unwrap();
//! assert_eq!(seen.get(), 0);
//! queue.run_until_idle();
//! assert_eq!(seen.get(), 42);
//! ```
pub mod combinators;
pub mod context;
pub mod deferred;
pub mod diagnostics;
pub mod group;
pub mod registry;
pub mod scheduler;
pub mod waiter;

pub use context::{Context, Settings};
pub use deferred::{Deferred, DeferredId, Status};
pub use diagnostics::{Diagnostic, DiagnosticSink, NullSink, TracingSink};
pub use group::group;
pub use registry::{DebugRegistry, Record, RegistrySnapshot};
pub use scheduler::{RunStats, Scheduler, Task, TaskHandle, TurnQueue};
pub use waiter::Waiter;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A second `resolve`/`reject` on the same deferred.
    #[error("{label} completed twice: previously {previous_status} with {previous_value}, attempted {attempted}")]
    DoubleCompletion {
        label: String,
        previous_status: String,
        previous_value: String,
        attempted: String,
    },
}

/// Capability shared by everything that represents a deferred outcome.
pub trait Awaitable {
    fn id(&self) -> DeferredId;

    fn status(&self) -> Status;

    fn is_complete(&self) -> bool {
        self.status() != Status::Pending
    }

    fn is_resolved(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }
}
