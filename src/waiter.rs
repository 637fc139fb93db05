//! Await a [`Deferred`] from async code.
use crate::{
    deferred::{Deferred, Subscriber},
    Error,
};
use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// A future for one deferred's outcome. It resolves once the deferred's
/// continuation has run on its scheduler, so something still has to drain
/// that scheduler.
///
/// # Examples
///
/// ```
/// use deferred::{resolve, MicrotaskQueue};
/// use futures::executor::block_on;
///
/// let queue = MicrotaskQueue::new();
/// let waiter = resolve::<_, ()>(queue.clone(), "hi").waiter();
/// queue.run_until_stalled();
/// assert_eq!(block_on(waiter), Ok(Ok("hi")));
/// ```
#[derive(Debug)]
pub struct Waiter<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Abandoned,
}

#[derive(Debug)]
struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Fills the slot when notified. Dropped without being notified means the
/// deferred went away while still pending.
struct Notifier<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
    delivered: bool,
}

impl<T, E> Subscriber<T, E> for Notifier<T, E> {
    fn notify(mut self: Box<Self>, outcome: Result<T, E>) {
        self.delivered = true;
        let mut slot = self.slot.borrow_mut();
        slot.value = Some(outcome);
        if let Ok(waker) = std::mem::replace(&mut slot.waker, Err(WakerState::Fresh)) {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        let mut slot = self.slot.borrow_mut();
        if let Ok(waker) = std::mem::replace(&mut slot.waker, Err(WakerState::Abandoned)) {
            waker.wake()
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Counts as attaching a continuation.
    pub fn waiter(&self) -> Waiter<T, E> {
        let slot = Rc::new(RefCell::new(Slot {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        self.subscribe(Box::new(Notifier {
            slot: slot.clone(),
            delivered: false,
        }));
        Waiter { slot }
    }
}

impl<T, E> Future for Waiter<T, E> {
    /// The deferred's outcome, or [`Error::Abandoned`] if it was dropped
    /// before settling.
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(outcome) => Poll::Ready(Ok(outcome)),
            None => match std::mem::replace(&mut slot.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Abandoned) => Poll::Ready(Err(Error::Abandoned)),
                _ => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{reject, Deferred, Error, MicrotaskQueue};
    use futures::{executor::block_on, FutureExt};

    #[test]
    fn test_waiter_pending_until_queue_drains() {
        let queue = MicrotaskQueue::new();
        let d = Deferred::<u8, ()>::new(queue.clone(), |ok, _| {
            ok.settle(8);
            Ok(())
        });
        let mut waiter = d.waiter();
        assert_eq!((&mut waiter).now_or_never(), None);
        queue.run_until_stalled();
        assert_eq!(block_on(waiter), Ok(Ok(8)));
    }

    #[test]
    fn test_waiter_reports_rejection() {
        let queue = MicrotaskQueue::new();
        let waiter = reject::<u8, _>(queue.clone(), "no").waiter();
        queue.run_until_stalled();
        assert_eq!(block_on(waiter), Ok(Err("no")));
        assert_eq!(queue.unhandled_rejections(), 0);
    }

    #[test]
    fn test_waiter_abandoned_when_deferred_dropped() {
        let queue = MicrotaskQueue::new();
        let d = Deferred::<u8, ()>::new(queue.clone(), |_, _| Ok(()));
        let waiter = d.waiter();
        drop(d);
        assert_eq!(block_on(waiter), Err(Error::Abandoned));
    }
}
