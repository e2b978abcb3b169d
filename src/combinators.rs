//! `chain`, `trap` and `always`: each builds one new deferred wired to an
//! existing one through [`Deferred::then`].
//!
//! Callbacks report failure by returning `Err`; that error becomes the
//! rejection of the combinator's output and never reaches the caller of
//! `resolve`/`reject`.
use crate::Deferred;
use std::{cell::Cell, fmt, panic::Location, rc::Rc};

/// Settles a combinator output. Outputs are wired exactly once, so a failure
/// here means the output was settled from outside; that earlier outcome is
/// kept and the double completion has already reached the sink.
pub(crate) fn forward<T, E>(target: &Deferred<T, E>, outcome: Result<T, E>)
where
    T: fmt::Debug + 'static,
    E: fmt::Debug + 'static,
{
    let settled = match outcome {
        Ok(value) => target.resolve(value),
        Err(reason) => target.reject(reason),
    };
    if let Err(err) = settled {
        tracing::debug!(deferred = %target, %err, "dropping upstream outcome");
    }
}

fn run_once<E, F>(slot: &Cell<Option<F>>) -> Result<(), E>
where
    F: FnOnce() -> Result<(), E>,
{
    slot.take().map_or(Ok(()), |side_effect| side_effect())
}

impl<T, E> Deferred<T, E>
where
    T: fmt::Debug + 'static,
    E: fmt::Debug + Clone + 'static,
{
    /// Maps the fulfillment value through `on_success`.
    ///
    /// The returned deferred fulfills with `Ok` from `on_success`, rejects
    /// with its `Err`, and rejects with the source's reason without calling
    /// `on_success` when the source rejects.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_promise::{Context, TurnQueue};
    /// use std::rc::Rc;
    ///
    /// let queue = Rc::new(TurnQueue::new());
    /// let ctx = Context::new(queue.clone());
    /// let source = ctx.deferred::<&str, String>();
    /// let parsed = source.chain(|text| text.parse::<u32>().map_err(|err| err.to_string()));
    /// parsed.on_rejected(|_| {});
    /// source.resolve("12").unwrap();
    /// queue.run_until_idle();
    /// assert!(parsed.is_resolved());
    /// ```
    #[track_caller]
    pub fn chain<U, F>(&self, on_success: F) -> Deferred<U, E>
    where
        U: fmt::Debug + 'static,
        F: FnOnce(&T) -> Result<U, E> + 'static,
    {
        let chained = Deferred::derived(self.context(), self.id(), Location::caller());
        let on_value = chained.clone();
        let on_reason = chained.clone();
        self.then(
            move |value| forward(&on_value, on_success(value)),
            move |reason: &E| forward(&on_reason, Err(reason.clone())),
        );
        chained
    }

    /// Recovers from a rejection.
    ///
    /// Fulfillment passes through untouched. On rejection the result of
    /// `recover` settles the returned deferred: `Ok` absorbs the failure,
    /// `Err` replaces the reason.
    #[track_caller]
    pub fn trap<F>(&self, recover: F) -> Deferred<T, E>
    where
        T: Clone,
        F: FnOnce(&E) -> Result<T, E> + 'static,
    {
        let trapped = Deferred::derived(self.context(), self.id(), Location::caller());
        let on_value = trapped.clone();
        let on_reason = trapped.clone();
        self.then(
            move |value: &T| forward(&on_value, Ok(value.clone())),
            move |reason| forward(&on_reason, recover(reason)),
        );
        trapped
    }

    /// Runs `side_effect` once the source settles, whichever way.
    ///
    /// The returned deferred keeps the source's outcome unless `side_effect`
    /// returns `Err`, in which case it rejects with that error.
    #[track_caller]
    pub fn always<F>(&self, side_effect: F) -> Deferred<T, E>
    where
        T: Clone,
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let finalized = Deferred::derived(self.context(), self.id(), Location::caller());
        let on_value = finalized.clone();
        let on_reason = finalized.clone();
        let slot = Rc::new(Cell::new(Some(side_effect)));
        let value_slot = slot.clone();
        self.then(
            move |value: &T| forward(&on_value, run_once(&value_slot).map(|()| value.clone())),
            move |reason: &E| {
                let thrown = run_once(&slot).err();
                forward(&on_reason, Err(thrown.unwrap_or_else(|| reason.clone())))
            },
        );
        finalized
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Status, TurnQueue};
    use std::{cell::Cell, cell::RefCell, rc::Rc};

    fn setup() -> (Rc<TurnQueue>, Context) {
        let queue = Rc::new(TurnQueue::new());
        let ctx = Context::new(queue.clone()).with_sink(Rc::new(crate::NullSink));
        (queue, ctx)
    }

    fn capture<T: Clone + std::fmt::Debug + 'static>(
        deferred: &crate::Deferred<T, String>,
    ) -> Rc<RefCell<Option<Result<T, String>>>> {
        let slot = Rc::new(RefCell::new(None));
        let ok = slot.clone();
        let err = slot.clone();
        deferred.then(
            move |value: &T| *ok.borrow_mut() = Some(Ok(value.clone())),
            move |reason: &String| *err.borrow_mut() = Some(Err(reason.clone())),
        );
        slot
    }

    #[test]
    fn chain_maps_value() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let chained = source.chain(|value| Ok(value + 1));
        assert_eq!(chained.chained_from(), Some(source.id()));
        let result = capture(&chained);
        source.resolve(1).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Ok(2)));
    }

    #[test]
    fn chain_callback_error_rejects() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let chained = source.chain(|_| Err::<u32, _>("bad".to_string()));
        let result = capture(&chained);
        source.resolve(1).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Err("bad".to_string())));
    }

    #[test]
    fn chain_skips_callback_on_rejection() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        let chained = source.chain(move |value| {
            flag.set(true);
            Ok(*value)
        });
        let result = capture(&chained);
        source.reject("upstream".into()).unwrap();
        queue.run_until_idle();
        assert!(!called.get());
        assert_eq!(*result.borrow(), Some(Err("upstream".to_string())));
    }

    #[test]
    fn chain_settles_one_turn_after_source() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let chained = source.chain(|value| Ok(*value));
        source.resolve(1).unwrap();
        queue.run_turn();
        assert_eq!(source.status(), Status::Fulfilled);
        assert_eq!(chained.status(), Status::Pending);
        queue.run_turn();
        assert_eq!(chained.status(), Status::Fulfilled);
    }

    #[test]
    fn trap_passes_value_through() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        let trapped = source.trap(move |_| {
            flag.set(true);
            Ok(0)
        });
        let result = capture(&trapped);
        source.resolve(4).unwrap();
        queue.run_until_idle();
        assert!(!called.get());
        assert_eq!(*result.borrow(), Some(Ok(4)));
    }

    #[test]
    fn trap_recovers() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<String, String>();
        let trapped = source.trap(|reason| Ok(format!("recovered from {reason}")));
        let result = capture(&trapped);
        source.reject("boom".into()).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Ok("recovered from boom".to_string())));
    }

    #[test]
    fn trap_recover_error_rejects() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let trapped = source.trap(|_| Err("still broken".to_string()));
        let result = capture(&trapped);
        source.reject("boom".into()).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Err("still broken".to_string())));
    }

    #[test]
    fn one_trap_absorbs_upstream_failure() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let downstream = source
            .chain(|value| Ok(value * 10))
            .chain(|value| Ok(value + 1))
            .trap(|_| Ok(0))
            .chain(|value| Ok(value + 100));
        let result = capture(&downstream);
        source.reject("early".into()).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Ok(100)));
    }

    #[test]
    fn always_preserves_fulfillment() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let finalized = source.always(move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        let result = capture(&finalized);
        source.resolve(8).unwrap();
        queue.run_until_idle();
        assert_eq!(runs.get(), 1);
        assert_eq!(*result.borrow(), Some(Ok(8)));
    }

    #[test]
    fn always_preserves_rejection() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let finalized = source.always(move || {
            flag.set(true);
            Ok(())
        });
        let result = capture(&finalized);
        source.reject("x".into()).unwrap();
        queue.run_until_idle();
        assert!(ran.get());
        assert_eq!(*result.borrow(), Some(Err("x".to_string())));
    }

    #[test]
    fn always_side_effect_error_wins_on_fulfillment() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let finalized = source.always(|| Err("cleanup failed".to_string()));
        let result = capture(&finalized);
        source.resolve(8).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Err("cleanup failed".to_string())));
    }

    #[test]
    fn always_side_effect_error_wins_on_rejection() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        let finalized = source.always(|| Err("cleanup failed".to_string()));
        let result = capture(&finalized);
        source.reject("original".into()).unwrap();
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Err("cleanup failed".to_string())));
    }

    #[test]
    fn combinators_on_settled_source_wire_immediately() {
        let (queue, ctx) = setup();
        let source = ctx.deferred::<u32, String>();
        source.resolve(2).unwrap();
        queue.run_until_idle();

        let chained = source.chain(|value| Ok(value * 3));
        assert_eq!(queue.pending(), 1);
        let result = capture(&chained);
        queue.run_until_idle();
        assert_eq!(*result.borrow(), Some(Ok(6)));
    }

    #[derive(Default)]
    struct Recording {
        seen: RefCell<Vec<crate::Diagnostic>>,
    }

    impl crate::DiagnosticSink for Recording {
        fn warn(&self, diagnostic: &crate::Diagnostic) {
            self.seen.borrow_mut().push(diagnostic.clone());
        }
    }

    #[test]
    fn externally_settled_output_keeps_its_value() {
        let queue = Rc::new(TurnQueue::new());
        let sink = Rc::new(Recording::default());
        let ctx = Context::new(queue.clone()).with_sink(sink.clone());
        let source = ctx.deferred::<u32, String>();
        let chained = source.chain(|value| Ok(value + 1));
        let result = capture(&chained);

        chained.resolve(100).unwrap();
        source.resolve(1).unwrap();
        queue.run_until_idle();

        assert_eq!(*result.borrow(), Some(Ok(100)));
        let seen = sink.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(matches!(
            &seen[0],
            crate::Diagnostic::DoubleCompletion { label, attempted, .. }
                if *label == chained.to_string() && attempted == "Ok(2)"
        ));
    }
}
