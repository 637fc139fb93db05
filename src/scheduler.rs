//! The task queue that continuations are deferred onto.
//!
//! A [`Deferred`](crate::Deferred) never runs a handler inline with the call
//! that settled it or attached it. Instead it hands a [`Task`] to whatever
//! [`Schedule`] it was built with. [`MicrotaskQueue`] is the plain FIFO
//! implementation and [`EventLoop`] layers timers on top of it for hosts and
//! tests that need "later" to mean something.
use log::trace;
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Enqueue work to run after the current synchronous execution completes.
pub trait Schedule {
    /// Must not run `task` before returning. Tasks run in FIFO order.
    fn schedule(&self, task: Task);

    /// Called when a rejected deferred is dropped without any continuation
    /// ever attached to it.
    fn unhandled_rejection(&self) {}
}

/// FIFO microtask queue.
///
/// # Examples
///
/// ```
/// use deferred::{MicrotaskQueue, Schedule};
/// use std::{cell::Cell, rc::Rc};
///
/// let queue = MicrotaskQueue::new();
/// let hits = Rc::new(Cell::new(0));
/// let h = hits.clone();
/// queue.schedule(Box::new(move || h.set(h.get() + 1)));
/// assert_eq!(hits.get(), 0);
/// assert_eq!(queue.run_until_stalled(), 1);
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Default)]
pub struct MicrotaskQueue {
    tasks: RefCell<VecDeque<Task>>,
    unhandled: Cell<usize>,
}

impl MicrotaskQueue {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Number of rejected deferreds dropped with nobody listening.
    pub fn unhandled_rejections(&self) -> usize {
        self.unhandled.get()
    }

    /// Run the oldest task. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow ends before the task runs so it can schedule more work.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including any enqueued along the
    /// way. Returns how many ran.
    pub fn run_until_stalled(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        trace!("microtask queue stalled after {ran} tasks");
        ran
    }
}

impl Schedule for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        let mut tasks = self.tasks.borrow_mut();
        tasks.push_back(task);
        trace!("scheduled microtask, {} queued", tasks.len());
    }

    fn unhandled_rejection(&self) {
        self.unhandled.set(self.unhandled.get() + 1);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("queued", &self.len())
            .field("unhandled", &self.unhandled.get())
            .finish()
    }
}

/// A single-threaded host loop: macrotasks and virtual-time timers, with the
/// microtask queue drained after every macrotask.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop};
///
/// let event_loop = EventLoop::new();
/// let timers = event_loop.clone();
/// let d = Deferred::<u32, ()>::new(event_loop.microtasks(), move |ok, _err| {
///     timers.set_timeout(10, Box::new(move || ok.settle(7)));
///     Ok(())
/// });
/// event_loop.run();
/// assert_eq!(d.outcome(), Some(Ok(7)));
/// assert_eq!(event_loop.now(), 10);
/// ```
#[derive(Clone, Default)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

#[derive(Default)]
struct LoopInner {
    microtasks: Rc<MicrotaskQueue>,
    macrotasks: RefCell<VecDeque<Task>>,
    // Keyed by (due time, registration order).
    timers: RefCell<BTreeMap<(u64, u64), Task>>,
    now: Cell<u64>,
    next_timer: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// The microtask queue deferreds on this loop should be built with.
    pub fn microtasks(&self) -> Rc<MicrotaskQueue> {
        self.inner.microtasks.clone()
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.now.get()
    }

    pub fn spawn(&self, task: Task) {
        self.inner.macrotasks.borrow_mut().push_back(task);
    }

    /// Run `task` as a macrotask once `delay_ms` of virtual time has passed.
    pub fn set_timeout(&self, delay_ms: u64, task: Task) {
        let seq = self.inner.next_timer.get();
        self.inner.next_timer.set(seq + 1);
        let due = self.now().saturating_add(delay_ms);
        trace!("timer {seq} due at {due}ms");
        self.inner.timers.borrow_mut().insert((due, seq), task);
    }

    fn next_macrotask(&self) -> Option<Task> {
        if let Some(task) = self.inner.macrotasks.borrow_mut().pop_front() {
            return Some(task);
        }
        let mut timers = self.inner.timers.borrow_mut();
        let key = *timers.keys().next()?;
        let task = timers.remove(&key)?;
        let (due, _) = key;
        if due > self.inner.now.get() {
            self.inner.now.set(due);
        }
        Some(task)
    }

    /// Run until no macrotasks, timers or microtasks remain. Returns how many
    /// macrotasks ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        self.inner.microtasks.run_until_stalled();
        while let Some(task) = self.next_macrotask() {
            task();
            ran += 1;
            self.inner.microtasks.run_until_stalled();
        }
        ran
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("macrotasks", &self.inner.macrotasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("microtasks", &self.inner.microtasks)
            .finish()
    }
}
