//! The completion state machine.
use crate::{context::Context, diagnostics::Diagnostic, registry::Record, Awaitable, Error};
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    cell::RefCell,
    fmt,
    panic::Location,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// Id counter shared by every context in the process
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeferredId(pub u64);

impl DeferredId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        })
    }
}

type SuccessHandler<T> = Box<dyn FnOnce(&T)>;
type ErrorHandler<E> = Box<dyn FnOnce(&E)>;

struct State<T, E> {
    status: Status,
    value: Option<Rc<Result<T, E>>>,
    /// Outcome accepted by resolve/reject, applied on the next turn.
    scheduled: Option<Result<T, E>>,
    success_handlers: Vec<SuccessHandler<T>>,
    error_handlers: Vec<ErrorHandler<E>>,
}

struct Shared<T, E> {
    id: DeferredId,
    ctx: Context,
    trace: Option<String>,
    created_at: &'static Location<'static>,
    chained_from: Option<DeferredId>,
    state: RefCell<State<T, E>>,
}

/// A value that will exist later.
///
/// `Deferred` is a handle: clones refer to the same state machine. It moves
/// from [`Status::Pending`] to either [`Status::Fulfilled`] or
/// [`Status::Rejected`] exactly once, or stays pending forever.
pub struct Deferred<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Deferred<T, E> {
    #[track_caller]
    pub fn new(ctx: &Context) -> Self {
        Self::build(ctx, None, None, Location::caller())
    }

    /// Like [`Deferred::new`], with a token echoed in diagnostics.
    #[track_caller]
    pub fn with_trace(ctx: &Context, trace: impl Into<String>) -> Self {
        Self::build(ctx, Some(trace.into()), None, Location::caller())
    }

    pub(crate) fn derived(
        ctx: &Context,
        source: DeferredId,
        created_at: &'static Location<'static>,
    ) -> Self {
        Self::build(ctx, None, Some(source), created_at)
    }

    fn build(
        ctx: &Context,
        trace: Option<String>,
        chained_from: Option<DeferredId>,
        created_at: &'static Location<'static>,
    ) -> Self {
        let id = DeferredId::next();
        if let Some(registry) = ctx.registry() {
            registry.register(Record {
                id,
                trace: trace.clone(),
                created_at,
                chained_from,
                status: Status::Pending,
            });
        }
        Self {
            shared: Rc::new(Shared {
                id,
                ctx: ctx.clone(),
                trace,
                created_at,
                chained_from,
                state: RefCell::new(State {
                    status: Status::Pending,
                    value: None,
                    scheduled: None,
                    success_handlers: Vec::new(),
                    error_handlers: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> DeferredId {
        self.shared.id
    }

    pub fn status(&self) -> Status {
        self.shared.state.borrow().status
    }

    pub fn is_complete(&self) -> bool {
        self.status() != Status::Pending
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    pub fn trace(&self) -> Option<&str> {
        self.shared.trace.as_deref()
    }

    /// The deferred this one was derived from by a combinator.
    pub fn chained_from(&self) -> Option<DeferredId> {
        self.shared.chained_from
    }

    pub fn created_at(&self) -> &'static Location<'static> {
        self.shared.created_at
    }

    pub(crate) fn context(&self) -> &Context {
        &self.shared.ctx
    }
}

impl<T, E> Deferred<T, E>
where
    T: fmt::Debug + 'static,
    E: fmt::Debug + 'static,
{
    /// Registers both continuations and returns `self`.
    ///
    /// While pending, the handlers are queued and run on the settlement turn,
    /// in registration order. Once settled, the matching handler runs right
    /// away, before `then` returns.
    pub fn then<S, F>(&self, on_success: S, on_error: F) -> &Self
    where
        S: FnOnce(&T) + 'static,
        F: FnOnce(&E) + 'static,
    {
        self.register(Some(Box::new(on_success)), Some(Box::new(on_error)))
    }

    /// `then` with only a success handler.
    pub fn on_fulfilled<S>(&self, on_success: S) -> &Self
    where
        S: FnOnce(&T) + 'static,
    {
        self.register(Some(Box::new(on_success)), None)
    }

    /// `then` with only an error handler.
    pub fn on_rejected<F>(&self, on_error: F) -> &Self
    where
        F: FnOnce(&E) + 'static,
    {
        self.register(None, Some(Box::new(on_error)))
    }

    fn register(
        &self,
        on_success: Option<SuccessHandler<T>>,
        on_error: Option<ErrorHandler<E>>,
    ) -> &Self {
        let settled = {
            let mut state = self.shared.state.borrow_mut();
            if state.status == Status::Pending {
                state.success_handlers.extend(on_success);
                state.error_handlers.extend(on_error);
                return self;
            }
            state.value.clone()
        };
        match settled.as_deref() {
            Some(Ok(value)) => {
                if let Some(handler) = on_success {
                    handler(value);
                }
            }
            Some(Err(reason)) => {
                if let Some(handler) = on_error {
                    handler(reason);
                }
            }
            None => {}
        }
        self
    }

    /// Fulfills with `value` on the next turn.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleCompletion`] if this deferred was already resolved or
    /// rejected, including a settlement still waiting for its turn.
    #[track_caller]
    pub fn resolve(&self, value: T) -> Result<&Self, Error> {
        self.complete(Ok(value), Location::caller())
    }

    /// Rejects with `reason` on the next turn.
    ///
    /// If no error handler is registered at this moment, an unhandled
    /// rejection is reported to the context's sink.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleCompletion`], as for [`Deferred::resolve`].
    #[track_caller]
    pub fn reject(&self, reason: E) -> Result<&Self, Error> {
        self.complete(Err(reason), Location::caller())
    }

    fn complete(
        &self,
        outcome: Result<T, E>,
        caller: &'static Location<'static>,
    ) -> Result<&Self, Error> {
        let accepted = {
            let mut state = self.shared.state.borrow_mut();
            if state.status != Status::Pending || state.scheduled.is_some() {
                Err(describe_previous(&*state, &outcome))
            } else {
                let unhandled = match &outcome {
                    Err(reason)
                        if state.error_handlers.is_empty()
                            && self.shared.ctx.settings().warn_unhandled =>
                    {
                        Some(format!("{reason:?}"))
                    }
                    _ => None,
                };
                state.scheduled = Some(outcome);
                Ok(unhandled)
            }
        };

        match accepted {
            Ok(unhandled) => {
                if let Some(reason) = unhandled {
                    self.report_unhandled(reason, caller);
                }
                let shared = self.shared.clone();
                self.shared.ctx.defer(Box::new(move || settle(&shared)));
                Ok(self)
            }
            Err((previous_status, previous_value, attempted)) => {
                let label = self.to_string();
                self.shared.ctx.warn(&Diagnostic::DoubleCompletion {
                    label: label.clone(),
                    previous_status: previous_status.clone(),
                    previous_value: previous_value.clone(),
                    attempted: attempted.clone(),
                });
                Err(Error::DoubleCompletion {
                    label,
                    previous_status,
                    previous_value,
                    attempted,
                })
            }
        }
    }

    fn report_unhandled(&self, reason: String, rejected_at: &'static Location<'static>) {
        let backtrace = Backtrace::capture();
        let backtrace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        self.shared.ctx.warn(&Diagnostic::UnhandledRejection {
            label: self.to_string(),
            trace: self.shared.trace.clone(),
            reason,
            rejected_at,
            created_at: self.shared.created_at,
            backtrace,
        });
    }
}

fn describe_previous<T, E>(
    state: &State<T, E>,
    attempted: &Result<T, E>,
) -> (String, String, String)
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    let (status, value) = match (&state.value, &state.scheduled) {
        (Some(value), _) => (state.status.to_string(), format!("{:?}", &**value)),
        (None, Some(scheduled)) => ("pending (settlement scheduled)".to_string(), format!("{scheduled:?}")),
        (None, None) => (state.status.to_string(), "nothing".to_string()),
    };
    (status, value, format!("{attempted:?}"))
}

/// The deferred half of resolve/reject.
fn settle<T, E>(shared: &Shared<T, E>) {
    let (value, success_handlers, error_handlers) = {
        let mut state = shared.state.borrow_mut();
        let Some(outcome) = state.scheduled.take() else {
            return;
        };
        state.status = match outcome {
            Ok(_) => Status::Fulfilled,
            Err(_) => Status::Rejected,
        };
        let value = Rc::new(outcome);
        state.value = Some(value.clone());
        (
            value,
            std::mem::take(&mut state.success_handlers),
            std::mem::take(&mut state.error_handlers),
        )
    };
    let status = match *value {
        Ok(_) => Status::Fulfilled,
        Err(_) => Status::Rejected,
    };
    tracing::trace!(
        deferred = %shared.id,
        %status,
        success_handlers = success_handlers.len(),
        error_handlers = error_handlers.len(),
        "settling"
    );
    match &*value {
        Ok(value) => {
            drop(error_handlers);
            for handler in success_handlers {
                handler(value);
            }
        }
        Err(reason) => {
            drop(success_handlers);
            for handler in error_handlers {
                handler(reason);
            }
        }
    }
    if let Some(registry) = shared.ctx.registry() {
        registry.settle(shared.id, status);
    }
}

impl<T, E> Awaitable for Deferred<T, E> {
    fn id(&self) -> DeferredId {
        self.shared.id
    }

    fn status(&self) -> Status {
        Deferred::status(self)
    }
}

impl<T, E> fmt::Display for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.shared.id, f)
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.shared.id.0)
            .field("status", &self.status())
            .field("trace", &self.shared.trace)
            .field("chained_from", &self.shared.chained_from)
            .finish()
    }
}
