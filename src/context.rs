//! The collaborators every deferred is built against.
use crate::{
    diagnostics::{Diagnostic, DiagnosticSink, TracingSink},
    registry::{DebugRegistry, DEFAULT_RECENT_CAPACITY},
    scheduler::{Scheduler, Task, TaskHandle},
    Deferred,
};
use std::{fmt, rc::Rc, time::Duration};

/// Tunables shared by every deferred of a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Delay handed to the scheduler when a settlement is deferred.
    pub minimal_delay: Duration,
    /// Whether rejections without an error handler are reported.
    pub warn_unhandled: bool,
    /// Size of the recent log for registries created by
    /// [`Context::with_debug_registry`].
    pub recent_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            minimal_delay: Duration::ZERO,
            warn_unhandled: true,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl Settings {
    pub fn with_minimal_delay(mut self, delay: Duration) -> Self {
        self.minimal_delay = delay;
        self
    }

    pub fn with_warn_unhandled(mut self, warn: bool) -> Self {
        self.warn_unhandled = warn;
        self
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }
}

/// Scheduling port, diagnostic sink, optional debug registry and settings.
///
/// Cloning is cheap; clones share the same collaborators.
///
/// # Examples
///
/// ```
/// use deferred_promise::{Context, TurnQueue};
/// use std::rc::Rc;
///
/// let queue = Rc::new(TurnQueue::new());
/// let ctx = Context::new(queue.clone()).with_debug_registry();
/// let answer = ctx.deferred::<u32, String>();
/// answer.resolve(42).unwrap();
/// queue.run_until_idle();
/// assert!(answer.is_resolved());
/// ```
#[derive(Clone)]
pub struct Context {
    scheduler: Rc<dyn Scheduler>,
    sink: Rc<dyn DiagnosticSink>,
    registry: Option<Rc<DebugRegistry>>,
    settings: Settings,
}

impl Context {
    /// A context reporting through `tracing`, without a registry.
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            sink: Rc::new(TracingSink),
            registry: None,
            settings: Settings::default(),
        }
    }

    pub fn with_sink(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_registry(mut self, registry: Rc<DebugRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attaches a fresh registry sized by [`Settings::recent_capacity`].
    pub fn with_debug_registry(self) -> Self {
        let registry = Rc::new(DebugRegistry::with_capacity(self.settings.recent_capacity));
        self.with_registry(registry)
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> Option<&Rc<DebugRegistry>> {
        self.registry.as_ref()
    }

    /// Shorthand for [`Deferred::new`].
    #[track_caller]
    pub fn deferred<T, E>(&self) -> Deferred<T, E> {
        Deferred::new(self)
    }

    pub(crate) fn defer(&self, task: Task) -> TaskHandle {
        self.scheduler.schedule(task, self.settings.minimal_delay)
    }

    pub(crate) fn warn(&self, diagnostic: &Diagnostic) {
        self.sink.warn(diagnostic);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
