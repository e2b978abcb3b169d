//! The scheduling port: how a deferred postpones its settlement to a later
//! turn. Hosts with their own loop implement [`Scheduler`] (a plain closure
//! works too); everyone else can drive a [`TurnQueue`].
use std::{cell::RefCell, fmt, time::Duration};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Identifies one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// Runs a task after at least `delay`, off the current call stack.
pub trait Scheduler {
    fn schedule(&self, task: Task, delay: Duration) -> TaskHandle;
}

impl<F> Scheduler for F
where
    F: Fn(Task, Duration) -> TaskHandle,
{
    fn schedule(&self, task: Task, delay: Duration) -> TaskHandle {
        self(task, delay)
    }
}

/// Totals reported by [`TurnQueue::run_until_idle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Number of turns that ran at least one task
    pub turns: usize,
    /// Number of tasks executed
    pub tasks: usize,
}

struct Queued {
    handle: TaskHandle,
    fire_at: Duration,
    task: Task,
}

#[derive(Default)]
struct QueueInner {
    now: Duration,
    next_handle: u64,
    tasks: Vec<Queued>,
}

/// A deterministic single-threaded scheduler with a virtual clock.
///
/// A turn runs every task due at the earliest fire time, in scheduling order.
/// Tasks scheduled while a turn is running wait for a later turn, even with a
/// zero delay.
///
/// # Examples
///
/// ```
/// use deferred_promise::{Scheduler, TurnQueue};
/// use std::{cell::Cell, rc::Rc, time::Duration};
///
/// let queue = TurnQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.schedule(Box::new(move || flag.set(true)), Duration::ZERO);
/// assert!(!ran.get());
/// queue.run_turn();
/// assert!(ran.get());
/// ```
#[derive(Default)]
pub struct TurnQueue {
    inner: RefCell<QueueInner>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Runs one turn and returns how many tasks it executed.
    pub fn run_turn(&self) -> usize {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let Some(earliest) = inner.tasks.iter().map(|queued| queued.fire_at).min() else {
                return 0;
            };
            inner.now = inner.now.max(earliest);
            let (mut due, rest): (Vec<Queued>, Vec<Queued>) = std::mem::take(&mut inner.tasks)
                .into_iter()
                .partition(|queued| queued.fire_at <= earliest);
            inner.tasks = rest;
            due.sort_by_key(|queued| (queued.fire_at, queued.handle));
            due
        };
        let count = batch.len();
        for queued in batch {
            tracing::trace!(handle = queued.handle.0, "running scheduled task");
            (queued.task)();
        }
        count
    }

    /// Runs turns until no task is left.
    pub fn run_until_idle(&self) -> RunStats {
        let mut stats = RunStats::default();
        loop {
            let ran = self.run_turn();
            if ran == 0 {
                return stats;
            }
            stats.turns += 1;
            stats.tasks += ran;
        }
    }
}

impl Scheduler for TurnQueue {
    fn schedule(&self, task: Task, delay: Duration) -> TaskHandle {
        let mut inner = self.inner.borrow_mut();
        inner.next_handle += 1;
        let handle = TaskHandle(inner.next_handle);
        let fire_at = inner.now + delay;
        inner.tasks.push(Queued { handle, fire_at, task });
        handle
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TurnQueue")
            .field("now", &inner.now)
            .field("pending", &inner.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |name| {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(name)) as Task
        })
    }

    #[test]
    fn runs_due_tasks_in_scheduling_order() {
        let queue = TurnQueue::new();
        let (log, task) = recorder();
        queue.schedule(task("a"), Duration::ZERO);
        queue.schedule(task("b"), Duration::ZERO);
        assert_eq!(queue.run_turn(), 2);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn earlier_fire_time_wins() {
        let queue = TurnQueue::new();
        let (log, task) = recorder();
        queue.schedule(task("late"), Duration::from_millis(5));
        queue.schedule(task("soon"), Duration::from_millis(1));
        assert_eq!(queue.run_turn(), 1);
        assert_eq!(queue.now(), Duration::from_millis(1));
        queue.run_turn();
        assert_eq!(*log.borrow(), vec!["soon", "late"]);
        assert_eq!(queue.now(), Duration::from_millis(5));
    }

    #[test]
    fn tasks_scheduled_during_a_turn_wait() {
        let queue = Rc::new(TurnQueue::new());
        let (log, task) = recorder();
        let inner_queue = queue.clone();
        let nested = task("nested");
        let outer = task("outer");
        queue.schedule(
            Box::new(move || {
                outer();
                inner_queue.schedule(nested, Duration::ZERO);
            }),
            Duration::ZERO,
        );
        assert_eq!(queue.run_turn(), 1);
        assert_eq!(*log.borrow(), vec!["outer"]);
        assert_eq!(queue.pending(), 1);
        let stats = queue.run_until_idle();
        assert_eq!(stats, RunStats { turns: 1, tasks: 1 });
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
    }

    #[test]
    fn closures_are_schedulers() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let port = move |task: Task, delay: Duration| {
            sink.borrow_mut().push(delay);
            task();
            TaskHandle(7)
        };
        let handle = port.schedule(Box::new(|| {}), Duration::from_millis(3));
        assert_eq!(handle, TaskHandle(7));
        assert_eq!(*seen.borrow(), vec![Duration::from_millis(3)]);
    }
}
