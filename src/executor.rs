//! Single-threaded deterministic executor
//!
//! Runs `!Send` futures on the current thread, polling ready tasks strictly in
//! the order they were woken. Timing objects use it for everything that must
//! happen "later but soon": deferred event dispatch and timer continuations.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A spawned future and its queue bookkeeping.
pub struct Task {
    id: u64,
    fut: RefCell<Option<LocalFuture>>,
    /// Set while the task sits in the ready queue.
    queued: Cell<bool>,
    done: Cell<bool>,
    queue: Weak<RefCell<ReadyQueue>>,
}

impl Task {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.done.get()
    }

    fn schedule(self: &Rc<Self>) {
        if self.is_finished() || self.queued.replace(true) {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.borrow_mut().tasks.push_back(self.clone());
        }
    }
}

#[derive(Default)]
struct ReadyQueue {
    tasks: VecDeque<Rc<Task>>,
    next_id: u64,
    live: usize,
}

/// FIFO executor for local futures.
pub struct Executor {
    queue: Rc<RefCell<ReadyQueue>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(ReadyQueue::default())),
        }
    }

    /// Queue a future; it is first polled on the next `run_until_stalled`.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) -> Rc<Task> {
        let id = {
            let mut q = self.queue.borrow_mut();
            let id = q.next_id;
            q.next_id += 1;
            q.live += 1;
            id
        };
        let task = Rc::new(Task {
            id,
            fut: RefCell::new(Some(Box::pin(fut))),
            queued: Cell::new(false),
            done: Cell::new(false),
            queue: Rc::downgrade(&self.queue),
        });
        task.schedule();
        task
    }

    /// Poll ready tasks until none are left. Tasks woken while draining run
    /// in the same call. Returns the number of polls performed.
    pub fn run_until_stalled(&self) -> usize {
        let mut polls = 0;
        loop {
            let Some(task) = self.queue.borrow_mut().tasks.pop_front() else {
                break;
            };
            task.queued.set(false);

            // Take the future out so a task that wakes itself mid-poll does not
            // observe a borrowed slot.
            let Some(mut fut) = task.fut.borrow_mut().take() else {
                continue;
            };

            polls += 1;
            let waker = task_waker(&task);
            let mut cx = Context::from_waker(&waker);

            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    task.done.set(true);
                    self.queue.borrow_mut().live -= 1;
                }
                Poll::Pending => {
                    *task.fut.borrow_mut() = Some(fut);
                }
            }
        }
        polls
    }

    pub fn has_ready_tasks(&self) -> bool {
        !self.queue.borrow().tasks.is_empty()
    }

    /// Tasks spawned but not yet finished (ready or parked).
    pub fn live_tasks(&self) -> usize {
        self.queue.borrow().live
    }
}

// --- Waker: an `Rc<Task>` behind a raw pointer ---

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

fn task_waker(task: &Rc<Task>) -> Waker {
    let raw = RawWaker::new(Rc::into_raw(task.clone()) as *const (), &VTABLE);
    // SAFETY: the vtable functions below treat `data` as an `Rc<Task>` produced
    // by `Rc::into_raw`, and the executor never leaves its thread.
    unsafe { Waker::from_raw(raw) }
}

unsafe fn clone_raw(data: *const ()) -> RawWaker {
    Rc::increment_strong_count(data as *const Task);
    RawWaker::new(data, &VTABLE)
}

unsafe fn wake_raw(data: *const ()) {
    let task = Rc::from_raw(data as *const Task);
    task.schedule();
}

unsafe fn wake_by_ref_raw(data: *const ()) {
    let task = std::mem::ManuallyDrop::new(Rc::from_raw(data as *const Task));
    task.schedule();
}

unsafe fn drop_raw(data: *const ()) {
    drop(Rc::from_raw(data as *const Task));
}
