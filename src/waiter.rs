use crate::{Awaitable, Deferred, DeferredId, Status};
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// A `std::future::Future` view of a [`Deferred`], for local executors.
///
/// Every waiter counts as an error handler of its deferred. Any number of
/// waiters may wait on the same deferred; each receives its own clone of the
/// outcome.
///
/// # Examples
///
/// ```
/// use deferred_promise::{Context, TurnQueue};
/// use futures::executor::block_on;
/// use std::rc::Rc;
///
/// let queue = Rc::new(TurnQueue::new());
/// let ctx = Context::new(queue.clone());
/// let deferred = ctx.deferred::<String, ()>();
/// let waiter = deferred.wait();
/// deferred.resolve("Hi".into()).unwrap();
/// queue.run_until_idle();
/// assert_eq!(block_on(waiter), Ok("Hi".to_string()));
/// ```
pub struct Waiter<T, E> {
    source: Deferred<T, E>,
    slot: Rc<RefCell<Slot<T, E>>>,
}

struct Slot<T, E> {
    value: Option<Result<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Slot<T, E> {
    fn fill(slot: &RefCell<Self>, value: Result<T, E>) {
        let wakers = {
            let mut slot = slot.borrow_mut();
            slot.value = Some(value);
            std::mem::take(&mut slot.wakers)
        };
        for waker in wakers {
            waker.wake()
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + fmt::Debug + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn wait(&self) -> Waiter<T, E> {
        let slot = Rc::new(RefCell::new(Slot {
            value: None,
            wakers: vec![],
        }));
        let on_value = slot.clone();
        let on_reason = slot.clone();
        self.then(
            move |value: &T| Slot::fill(&on_value, Ok(value.clone())),
            move |reason: &E| Slot::fill(&on_reason, Err(reason.clone())),
        );
        Waiter {
            source: self.clone(),
            slot,
        }
    }
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E> Awaitable for Waiter<T, E> {
    fn id(&self) -> DeferredId {
        self.source.id()
    }

    fn status(&self) -> Status {
        self.source.status()
    }
}

impl<T, E> fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("source", &self.source).finish()
    }
}
