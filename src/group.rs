//! N-way aggregation of deferreds.
use crate::{combinators::forward, Context, Deferred};
use std::{cell::RefCell, fmt, rc::Rc};

struct GroupState<T> {
    results: Vec<Option<T>>,
    completed: usize,
    failed: bool,
}

/// Collects the fulfillment values of `members`, in input order.
///
/// The returned deferred fulfills once every member has fulfilled, and
/// rejects with the first rejection to arrive. Anything that settles after
/// that first rejection has no visible effect. An empty input fulfills with
/// an empty vector on the next turn.
///
/// # Examples
///
/// ```
/// use deferred_promise::{group, Context, TurnQueue};
/// use std::{cell::RefCell, rc::Rc};
///
/// let queue = Rc::new(TurnQueue::new());
/// let ctx = Context::new(queue.clone());
/// let first = ctx.deferred::<u32, String>();
/// let second = ctx.deferred::<u32, String>();
/// let all = group(&ctx, [first.clone(), second.clone()]);
///
/// let collected = Rc::new(RefCell::new(Vec::new()));
/// let sink = collected.clone();
/// all.on_fulfilled(move |values| sink.borrow_mut().extend_from_slice(values));
///
/// second.resolve(2).unwrap();
/// first.resolve(1).unwrap();
/// queue.run_until_idle();
/// assert_eq!(*collected.borrow(), vec![1, 2]);
/// ```
#[track_caller]
pub fn group<T, E, I>(ctx: &Context, members: I) -> Deferred<Vec<T>, E>
where
    T: Clone + fmt::Debug + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let members: Vec<Deferred<T, E>> = members.into_iter().collect();
    let grouped = Deferred::new(ctx);
    let total = members.len();
    if total == 0 {
        forward(&grouped, Ok(Vec::new()));
        return grouped;
    }

    let state = Rc::new(RefCell::new(GroupState {
        results: (0..total).map(|_| None).collect(),
        completed: 0,
        failed: false,
    }));
    for (index, member) in members.iter().enumerate() {
        let on_value_state = state.clone();
        let on_value = grouped.clone();
        let on_reason_state = state.clone();
        let on_reason = grouped.clone();
        member.then(
            move |value: &T| {
                let finished = {
                    let mut state = on_value_state.borrow_mut();
                    state.results[index] = Some(value.clone());
                    state.completed += 1;
                    if state.completed == total && !state.failed {
                        state.results.drain(..).collect::<Option<Vec<T>>>()
                    } else {
                        None
                    }
                };
                if let Some(values) = finished {
                    forward(&on_value, Ok(values));
                }
            },
            move |reason: &E| {
                let first = !std::mem::replace(&mut on_reason_state.borrow_mut().failed, true);
                if first {
                    forward(&on_reason, Err(reason.clone()));
                }
            },
        );
    }
    grouped
}

impl Context {
    /// Shorthand for [`group`].
    #[track_caller]
    pub fn group<T, E, I>(&self, members: I) -> Deferred<Vec<T>, E>
    where
        T: Clone + fmt::Debug + 'static,
        E: Clone + fmt::Debug + 'static,
        I: IntoIterator<Item = Deferred<T, E>>,
    {
        group(self, members)
    }
}
