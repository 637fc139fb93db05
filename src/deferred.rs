//! The deferred value state machine.
//!
//! A [`Deferred`] starts out pending and settles exactly once, either
//! fulfilled with a `T` or rejected with an `E`. Continuations attached with
//! [`then`](Deferred::then), [`catch`](Deferred::catch) and
//! [`finally`](Deferred::finally) each get a fresh downstream `Deferred` that
//! settles from the handler's result. Handlers always run from the injected
//! [`Schedule`], never inline with the call that settled or attached them.
use crate::{scheduler::Schedule, Error, Thenable};
use log::{debug, trace, warn};
use std::{cell::RefCell, fmt, rc::Rc};

/// Where a deferred is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("pending"),
            Status::Fulfilled => f.write_str("fulfilled"),
            Status::Rejected => f.write_str("rejected"),
        }
    }
}

/// A continuation handler. Returning `Err` rejects the downstream deferred.
pub type Handler<A, U, E> = Box<dyn FnOnce(A) -> Result<U, E>>;

/// A resolver whose presence is only known at runtime.
pub type BoxedResolver<T, E> =
    Box<dyn FnOnce(SettleOk<T, E>, SettleErr<T, E>) -> Result<(), E>>;

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T: Clone, E: Clone> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// Something waiting on a deferred's outcome.
pub(crate) trait Subscriber<T, E> {
    fn notify(self: Box<Self>, outcome: Result<T, E>);

    /// Drop this subscriber without notifying it, handing any downstream
    /// deferred it owns to `links` instead of dropping it in place.
    fn release(self: Box<Self>, links: &mut Vec<Box<dyn Link>>) {
        let _ = links;
    }
}

/// A deferred handle that can give up its subscribers for teardown.
pub(crate) trait Link {
    fn detach(&mut self, links: &mut Vec<Box<dyn Link>>);
}

/// The record `then` leaves behind: one handler per branch plus the
/// deferred their result settles.
struct Continuation<T, U, E> {
    on_fulfilled: Handler<T, U, E>,
    on_rejected: Handler<E, U, E>,
    downstream: Deferred<U, E>,
}

impl<T, U, E> Subscriber<T, E> for Continuation<T, U, E>
where
    U: Clone + 'static,
    E: Clone + 'static,
{
    fn notify(self: Box<Self>, outcome: Result<T, E>) {
        let Continuation {
            on_fulfilled,
            on_rejected,
            downstream,
        } = *self;
        let result = match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        };
        downstream.settle(result);
    }

    fn release(self: Box<Self>, links: &mut Vec<Box<dyn Link>>) {
        links.push(Box::new(self.downstream));
    }
}

/// Left behind by `finally`: the callback and the deferred that receives the
/// source's outcome.
struct Finally<F, T, E> {
    on_settled: F,
    downstream: Deferred<T, E>,
}

impl<F, T, E> Subscriber<T, E> for Finally<F, T, E>
where
    F: FnOnce() -> Result<(), E>,
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn notify(self: Box<Self>, outcome: Result<T, E>) {
        let Finally {
            on_settled,
            downstream,
        } = *self;
        match on_settled() {
            Ok(()) => downstream.settle(outcome),
            Err(reason) => downstream.settle(Err(reason)),
        }
    }

    fn release(self: Box<Self>, links: &mut Vec<Box<dyn Link>>) {
        links.push(Box::new(self.downstream));
    }
}

/// Adapts a plain closure into a subscriber.
struct Callback<F>(F);

impl<T, E, F> Subscriber<T, E> for Callback<F>
where
    F: FnOnce(Result<T, E>),
{
    fn notify(self: Box<Self>, outcome: Result<T, E>) {
        let Callback(callback) = *self;
        callback(outcome)
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    subscribers: Vec<Box<dyn Subscriber<T, E>>>,
    scheduler: Rc<dyn Schedule>,
    // Set once anything subscribes, so a rejection has somewhere to go.
    observed: bool,
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if matches!(self.state, State::Rejected(_)) && !self.observed {
            warn!("rejected deferred dropped without a rejection handler");
            self.scheduler.unhandled_rejection();
        }
    }
}

/// A value that is not known yet.
///
/// Cloning a `Deferred` clones the handle, not the value: every clone
/// observes the same settlement.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, MicrotaskQueue};
///
/// let queue = MicrotaskQueue::new();
/// let d = Deferred::<i32, String>::new(queue.clone(), |ok, _err| {
///     ok.settle(1);
///     Ok(())
/// });
/// let next = d.then(|v| Ok(v + 1));
/// assert!(next.is_pending());
/// queue.run_until_stalled();
/// assert_eq!(next.outcome(), Some(Ok(2)));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Link for Deferred<T, E> {
    fn detach(&mut self, links: &mut Vec<Box<dyn Link>>) {
        if Rc::strong_count(&self.inner) != 1 {
            return;
        }
        let subscribers = match self.inner.try_borrow_mut() {
            Ok(mut inner) => std::mem::take(&mut inner.subscribers),
            Err(_) => return,
        };
        for subscriber in subscribers {
            subscriber.release(links);
        }
    }
}

// A pending chain owns its downstream deferreds through its subscribers.
// Tear it down with a work list so long chains don't overflow the stack.
impl<T, E> Drop for Deferred<T, E> {
    fn drop(&mut self) {
        let mut links = Vec::new();
        self.detach(&mut links);
        while let Some(mut link) = links.pop() {
            link.detach(&mut links);
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create a deferred and run `resolver` synchronously with its two
    /// settle capabilities. If the resolver returns `Err`, the deferred is
    /// rejected with it, unless it already settled.
    pub fn new<R>(scheduler: Rc<dyn Schedule>, resolver: R) -> Self
    where
        R: FnOnce(SettleOk<T, E>, SettleErr<T, E>) -> Result<(), E>,
    {
        let deferred = Self::pending(scheduler);
        let ok = SettleOk {
            deferred: deferred.clone(),
        };
        let err = SettleErr {
            deferred: deferred.clone(),
        };
        if let Err(reason) = resolver(ok, err) {
            trace!("resolver failed synchronously");
            deferred.settle(Err(reason));
        }
        deferred
    }

    /// Like [`Deferred::new`] for a resolver that may be missing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidResolver`] if `resolver` is `None`.
    pub fn from_resolver(
        scheduler: Rc<dyn Schedule>,
        resolver: Option<BoxedResolver<T, E>>,
    ) -> Result<Self, Error> {
        let resolver = resolver.ok_or(Error::InvalidResolver)?;
        Ok(Self::new(scheduler, resolver))
    }

    /// A pending deferred that only the chaining machinery will settle.
    pub(crate) fn pending(scheduler: Rc<dyn Schedule>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                subscribers: Vec::new(),
                scheduler,
                observed: false,
            })),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// The settled value, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.inner.borrow().state.outcome()
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Schedule> {
        self.inner.borrow().scheduler.clone()
    }

    /// Move out of pending and notify every queued subscriber in the order
    /// they were attached. Ignored once settled.
    pub(crate) fn settle(&self, outcome: Result<T, E>) {
        let (subscribers, scheduler) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                debug!(
                    "ignoring settlement of an already {} deferred",
                    inner.state.status()
                );
                return;
            }
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            trace!(
                "deferred {}, notifying {} subscribers",
                inner.state.status(),
                inner.subscribers.len()
            );
            (
                std::mem::take(&mut inner.subscribers),
                inner.scheduler.clone(),
            )
        };
        for subscriber in subscribers {
            notify(scheduler.as_ref(), subscriber, outcome.clone());
        }
    }

    /// Queue `subscriber` while pending, or schedule it right away once
    /// settled.
    pub(crate) fn subscribe(&self, subscriber: Box<dyn Subscriber<T, E>>) {
        let (outcome, scheduler) = {
            let mut inner = self.inner.borrow_mut();
            inner.observed = true;
            let settled = inner.state.outcome();
            match settled {
                Some(outcome) => (outcome, inner.scheduler.clone()),
                None => {
                    inner.subscribers.push(subscriber);
                    return;
                }
            }
        };
        notify(scheduler.as_ref(), subscriber, outcome);
    }

    /// Attach a handler for each branch, both producing a new value type.
    pub fn then_both<U>(
        &self,
        on_fulfilled: Handler<T, U, E>,
        on_rejected: Handler<E, U, E>,
    ) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        let downstream = Deferred::pending(self.scheduler());
        self.subscribe(Box::new(Continuation {
            on_fulfilled,
            on_rejected,
            downstream: downstream.clone(),
        }));
        downstream
    }

    /// Attach optional handlers for either branch. A missing handler
    /// forwards the settled status and value to the returned deferred
    /// unchanged.
    pub fn then_with(
        &self,
        on_fulfilled: Option<Handler<T, T, E>>,
        on_rejected: Option<Handler<E, T, E>>,
    ) -> Deferred<T, E> {
        let on_fulfilled: Handler<T, T, E> = match on_fulfilled {
            Some(handler) => handler,
            None => Box::new(|value: T| Ok(value)),
        };
        let on_rejected: Handler<E, T, E> = match on_rejected {
            Some(handler) => handler,
            None => Box::new(|reason: E| Err(reason)),
        };
        self.then_both(on_fulfilled, on_rejected)
    }

    pub fn then<F>(&self, on_fulfilled: F) -> Deferred<T, E>
    where
        F: FnOnce(T) -> Result<T, E> + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), None)
    }

    /// Handle a rejection. Returning `Ok` recovers the chain.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred<T, E>
    where
        R: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.then_with(None, Some(Box::new(on_rejected)))
    }

    /// Run `on_settled` whichever way this settles, then settle the returned
    /// deferred with the very same outcome. If `on_settled` fails, the
    /// returned deferred is rejected with its error instead.
    ///
    /// With no callback to run, `then_with(None, None)` is the equivalent.
    pub fn finally<F>(&self, on_settled: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let downstream = Deferred::pending(self.scheduler());
        self.subscribe(Box::new(Finally {
            on_settled,
            downstream: downstream.clone(),
        }));
        downstream
    }

    /// Transform the fulfilled value into another type. Rejections pass
    /// through.
    pub fn map<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.then_both(Box::new(on_fulfilled), Box::new(|reason: E| Err(reason)))
    }
}

fn notify<T, E>(
    scheduler: &dyn Schedule,
    subscriber: Box<dyn Subscriber<T, E>>,
    outcome: Result<T, E>,
) where
    T: 'static,
    E: 'static,
{
    scheduler.schedule(Box::new(move || subscriber.notify(outcome)));
}

impl<T, E> fmt::Debug for Deferred<T, E>
where
    T: Clone + fmt::Debug,
    E: Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("status", &inner.state.status())
            .field("outcome", &inner.state.outcome())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn attach(self, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>) {
        (&self).attach(on_fulfilled, on_rejected)
    }
}

impl<T, E> Thenable<T, E> for &Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn attach(self, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>) {
        self.subscribe(Box::new(Callback(move |outcome: Result<T, E>| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        })));
    }
}

/// Fulfills the deferred it was handed out for. Calls after the first
/// settlement are ignored.
pub struct SettleOk<T, E> {
    deferred: Deferred<T, E>,
}

/// Rejects the deferred it was handed out for. Calls after the first
/// settlement are ignored.
pub struct SettleErr<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for SettleOk<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> Clone for SettleErr<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> SettleOk<T, E> {
    pub fn settle(&self, value: T) {
        self.deferred.settle(Ok(value))
    }
}

impl<T: Clone + 'static, E: Clone + 'static> SettleErr<T, E> {
    pub fn settle(&self, reason: E) {
        self.deferred.settle(Err(reason))
    }
}
