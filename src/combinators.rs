//! Functions that build a new [`Deferred`] out of values or other thenables.
use crate::{scheduler::Schedule, Deferred, Thenable};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// A deferred already fulfilled with `value`.
pub fn resolve<T, E>(scheduler: Rc<dyn Schedule>, value: T) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Deferred::new(scheduler, move |ok, _err| {
        ok.settle(value);
        Ok(())
    })
}

/// A deferred that adopts whatever `thenable` settles to, fulfillment or
/// rejection.
///
/// # Examples
///
/// ```
/// use deferred::{resolve, resolve_thenable, MicrotaskQueue};
///
/// let queue = MicrotaskQueue::new();
/// let inner = resolve::<_, ()>(queue.clone(), 5);
/// let outer = resolve_thenable(queue.clone(), inner);
/// queue.run_until_stalled();
/// assert_eq!(outer.outcome(), Some(Ok(5)));
/// ```
pub fn resolve_thenable<T, E, Th>(scheduler: Rc<dyn Schedule>, thenable: Th) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    Th: Thenable<T, E>,
{
    Deferred::new(scheduler, move |ok, err| {
        thenable.attach(
            Box::new(move |value| ok.settle(value)),
            Box::new(move |reason| err.settle(reason)),
        );
        Ok(())
    })
}

/// A deferred already rejected with `reason`.
pub fn reject<T, E>(scheduler: Rc<dyn Schedule>, reason: E) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Deferred::new(scheduler, move |_ok, err| {
        err.settle(reason);
        Ok(())
    })
}

/// Fulfills with every item's value, in input order, once all of them have
/// fulfilled. Rejects with the first rejection to arrive. An empty input
/// fulfills with an empty vector.
///
/// # Examples
///
/// ```
/// use deferred::{all, resolve, MicrotaskQueue};
///
/// let queue = MicrotaskQueue::new();
/// let items = vec![resolve::<_, ()>(queue.clone(), 1), resolve(queue.clone(), 2)];
/// let both = all(queue.clone(), items);
/// queue.run_until_stalled();
/// assert_eq!(both.outcome(), Some(Ok(vec![1, 2])));
/// ```
pub fn all<T, E, I>(scheduler: Rc<dyn Schedule>, items: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator,
    I::Item: Thenable<T, E>,
{
    let items: Vec<I::Item> = items.into_iter().collect();
    Deferred::new(scheduler, move |ok, err| {
        if items.is_empty() {
            ok.settle(Vec::new());
            return Ok(());
        }
        let results: Rc<RefCell<Vec<Option<T>>>> =
            Rc::new(RefCell::new(vec![None; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let (results, remaining, ok, err) =
                (results.clone(), remaining.clone(), ok.clone(), err.clone());
            item.attach(
                Box::new(move |value| {
                    results.borrow_mut()[index] = Some(value);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values: Vec<T> = results.borrow_mut().drain(..).flatten().collect();
                        ok.settle(values);
                    }
                }),
                Box::new(move |reason| err.settle(reason)),
            );
        }
        Ok(())
    })
}

/// Settles the same way as the first item to settle. An empty input never
/// settles.
pub fn race<T, E, I>(scheduler: Rc<dyn Schedule>, items: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator,
    I::Item: Thenable<T, E>,
{
    Deferred::new(scheduler, move |ok, err| {
        for item in items {
            let (ok, err) = (ok.clone(), err.clone());
            item.attach(
                Box::new(move |value| ok.settle(value)),
                Box::new(move |reason| err.settle(reason)),
            );
        }
        Ok(())
    })
}

/// Fulfills with every item's outcome, in input order, once all of them
/// have settled. Never rejects.
pub fn all_settled<T, E, I>(
    scheduler: Rc<dyn Schedule>,
    items: I,
) -> Deferred<Vec<Result<T, E>>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator,
    I::Item: Thenable<T, E>,
{
    let items: Vec<I::Item> = items.into_iter().collect();
    Deferred::new(scheduler, move |ok, _err| {
        if items.is_empty() {
            ok.settle(Vec::new());
            return Ok(());
        }
        let outcomes: Rc<RefCell<Vec<Option<Result<T, E>>>>> =
            Rc::new(RefCell::new(vec![None; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let record = {
                let (outcomes, remaining, ok) = (outcomes.clone(), remaining.clone(), ok.clone());
                Rc::new(move |outcome: Result<T, E>| {
                    outcomes.borrow_mut()[index] = Some(outcome);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let settled: Vec<Result<T, E>> =
                            outcomes.borrow_mut().drain(..).flatten().collect();
                        ok.settle(settled);
                    }
                })
            };
            let on_rejected = record.clone();
            item.attach(
                Box::new(move |value| record(Ok(value))),
                Box::new(move |reason| on_rejected(Err(reason))),
            );
        }
        Ok(())
    })
}
