#[cfg(test)]
mod tests {
    use deferred::{
        all, reject, resolve, resolve_thenable, Deferred, EventLoop, MicrotaskQueue, SettleErr,
        SettleOk, Status, Thenable,
    };
    use futures::executor::block_on;
    use std::{cell::RefCell, rc::Rc};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn pending<T: Clone + 'static, E: Clone + 'static>(
        queue: &Rc<MicrotaskQueue>,
    ) -> (Deferred<T, E>, SettleOk<T, E>, SettleErr<T, E>) {
        let settlers = Rc::new(RefCell::new(None));
        let slot = settlers.clone();
        let d = Deferred::new(queue.clone(), move |ok, err| {
            *slot.borrow_mut() = Some((ok, err));
            Ok(())
        });
        let (ok, err) = settlers.borrow_mut().take().expect("resolver ran");
        (d, ok, err)
    }

    #[test]
    fn test_chain_runs_after_construction_returns() {
        init_logger();
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::new(RefCell::new(None));

        let (l, s) = (log.clone(), seen.clone());
        let last = resolve::<i32, String>(queue.clone(), 1)
            .then(|v| Ok(v + 1))
            .finally(move || {
                l.borrow_mut().push("finally");
                Ok(())
            })
            .then(move |v| {
                *s.borrow_mut() = Some(v);
                Ok(v)
            });
        assert!(log.borrow().is_empty());
        assert_eq!(*seen.borrow(), None);

        queue.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["finally"]);
        assert_eq!(*seen.borrow(), Some(2));
        assert_eq!(last.outcome(), Some(Ok(2)));
    }

    #[test]
    fn test_only_first_settlement_counts() {
        let queue = MicrotaskQueue::new();
        let (d, ok, err) = pending::<&str, &str>(&queue);
        ok.settle("first");
        err.settle("second");
        ok.settle("third");
        assert_eq!(d.status(), Status::Fulfilled);
        assert_eq!(d.outcome(), Some(Ok("first")));

        let (d, ok, err) = pending::<&str, &str>(&queue);
        err.settle("first");
        ok.settle("second");
        assert_eq!(d.status(), Status::Rejected);
        assert_eq!(d.outcome(), Some(Err("first")));
    }

    #[test]
    fn test_handlers_record_in_attachment_order() {
        let queue = MicrotaskQueue::new();
        let (d, _, err) = pending::<i32, i32>(&queue);
        let recorder = Rc::new(RefCell::new(Vec::new()));
        for i in 0..4 {
            let r = recorder.clone();
            d.catch(move |reason| {
                r.borrow_mut().push(i);
                Ok(reason)
            });
        }
        err.settle(0);
        queue.run_until_stalled();
        assert_eq!(*recorder.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_downstream_subscribers_wait_for_downstream() {
        let queue = MicrotaskQueue::new();
        let (d, ok, _) = pending::<i32, ()>(&queue);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        let first = d.then(move |v| {
            o.borrow_mut().push("first");
            Ok(v)
        });
        let o = order.clone();
        first.then(move |v| {
            o.borrow_mut().push("first.next");
            Ok(v)
        });
        let o = order.clone();
        d.then(move |v| {
            o.borrow_mut().push("second");
            Ok(v)
        });
        ok.settle(1);
        queue.run_until_stalled();
        assert_eq!(*order.borrow(), vec!["first", "second", "first.next"]);
    }

    #[test]
    fn test_finally_on_rejection_keeps_reason() {
        let queue = MicrotaskQueue::new();
        let calls = Rc::new(RefCell::new(0));
        let c = calls.clone();
        let after = reject::<i32, _>(queue.clone(), "reason").finally(move || {
            *c.borrow_mut() += 1;
            Ok(())
        });
        queue.run_until_stalled();
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(after.outcome(), Some(Err("reason")));
    }

    #[test]
    fn test_failing_cleanup_replaces_outcome() {
        let queue = MicrotaskQueue::new();
        let cleaned = resolve::<i32, String>(queue.clone(), 1)
            .finally(|| Err("cleanup".to_string()))
            .catch(|reason| Ok(reason.len() as i32));
        queue.run_until_stalled();
        assert_eq!(cleaned.outcome(), Some(Ok(7)));
    }

    #[test]
    fn test_all_with_deferreds_settled_by_timers() {
        init_logger();
        let event_loop = EventLoop::new();
        let delayed = |value: &'static str, delay: u64| {
            let timers = event_loop.clone();
            Deferred::<&str, &str>::new(event_loop.microtasks(), move |ok, _| {
                timers.set_timeout(delay, Box::new(move || ok.settle(value)));
                Ok(())
            })
        };
        let items = vec![delayed("a", 20), delayed("b", 30), delayed("c", 10)];
        let combined = all(event_loop.microtasks(), items);
        let waiter = combined.waiter();
        event_loop.run();
        assert_eq!(event_loop.now(), 30);
        assert_eq!(block_on(waiter), Ok(Ok(vec!["a", "b", "c"])));
    }

    #[test]
    fn test_all_short_circuits_on_rejection() {
        let queue = MicrotaskQueue::new();
        let (never, _keep_ok, _keep_err) = pending::<i32, &str>(&queue);
        let combined = all(queue.clone(), vec![never, reject(queue.clone(), "X")]);
        queue.run_until_stalled();
        assert_eq!(combined.outcome(), Some(Err("X")));
    }

    #[test]
    fn test_all_of_nothing() {
        let queue = MicrotaskQueue::new();
        let combined = all::<u8, (), _>(queue.clone(), Vec::<Deferred<u8, ()>>::new());
        assert_eq!(combined.outcome(), Some(Ok(Vec::new())));
    }

    struct FulfillsWith(i32);

    impl Thenable<i32, ()> for FulfillsWith {
        fn attach(self, on_fulfilled: Box<dyn FnOnce(i32)>, _: Box<dyn FnOnce(())>) {
            on_fulfilled(self.0)
        }
    }

    #[test]
    fn test_resolve_adopts_thenable() {
        let queue = MicrotaskQueue::new();
        let adopted = resolve_thenable(queue.clone(), FulfillsWith(5));
        let doubled = adopted.then(|v| Ok(v * 2));
        queue.run_until_stalled();
        assert_eq!(adopted.outcome(), Some(Ok(5)));
        assert_eq!(doubled.outcome(), Some(Ok(10)));
    }

    #[test]
    fn test_resolver_settling_later_from_event_loop() {
        let event_loop = EventLoop::new();
        let spawner = event_loop.clone();
        let d = Deferred::<i32, String>::new(event_loop.microtasks(), move |_, err| {
            spawner.spawn(Box::new(move || err.settle("late failure".to_string())));
            Ok(())
        });
        let recovered = d.catch(|reason| Ok(reason.len() as i32));
        assert!(d.is_pending());
        event_loop.run();
        assert_eq!(recovered.outcome(), Some(Ok(12)));
    }
}
