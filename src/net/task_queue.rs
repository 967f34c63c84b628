// SPDX-License-Identifier: GPL-3.0-or-later

//! A bounded worker pool with an unbounded FIFO task queue (spec §4.2).
//! Grounded on `other_examples/jafreck-lz4r__src-threadpool.rs`'s
//! channel-backed pool (there a bounded channel doubles as a counting
//! semaphore; here an unbounded `crossbeam_channel` is the FIFO itself) and
//! on `CycleChain-ignix`'s worker dispatch loop (`rx_task_cl.recv()`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

/// One unit of work dispatched to a worker thread (spec §3 "Task"). The
/// worker-thread index (spec's "worker thread with stable index") is
/// supplied to the handler by [`TaskQueue`] at dispatch time, not carried
/// inside the task itself.
pub enum Task<T> {
    Session { payload: T, aborted: bool },
    Idle,
    Timer,
}

/// Fixed-size worker pool. `start`/`add_task`/`finish`/`count` match spec
/// §4.2 verbatim; `abort` marks tasks queued from that point on so a worker
/// can short-circuit their payload instead of processing it.
pub struct TaskQueue<T: Send + 'static> {
    sender: Mutex<Option<Sender<Task<T>>>>,
    receiver: Receiver<Task<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicU64,
    aborted: AtomicBool,
    dispatched: AtomicU64,
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        TaskQueue {
            sender: Mutex::new(Some(sender)),
            receiver,
            handles: Mutex::new(Vec::new()),
            worker_count: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Spawns `n` worker threads, each running `handler(worker_index,
    /// task)` for every task it dequeues until the queue is closed. Spec
    /// invariant: `do_start` once per worker before any task, `do_finish`
    /// once per worker after the last — modeled here as `on_start`/
    /// `on_finish` hooks bracketing the receive loop.
    pub fn start<F, OnStart, OnFinish>(&self, n: usize, on_start: OnStart, on_finish: OnFinish, handler: F)
    where
        F: Fn(usize, Task<T>) + Send + Sync + Clone + 'static,
        OnStart: Fn(usize) + Send + Sync + Clone + 'static,
        OnFinish: Fn(usize) + Send + Sync + Clone + 'static,
    {
        assert!(n > 0, "TaskQueue needs at least one worker");
        let mut handles = Vec::with_capacity(n);
        for idx in 0..n {
            let receiver = self.receiver.clone();
            let handler = handler.clone();
            let on_start = on_start.clone();
            let on_finish = on_finish.clone();
            handles.push(std::thread::spawn(move || {
                on_start(idx);
                while let Ok(task) = receiver.recv() {
                    handler(idx, task);
                }
                on_finish(idx);
            }));
        }
        self.worker_count.store(n as u64, Ordering::Release);
        *self.handles.lock() = handles;
    }

    /// Thread-safe, unbounded FIFO push. Workers are not pinned to tasks —
    /// whichever worker is next to `recv` gets it.
    pub fn add_task(&self, payload: T) {
        let aborted = self.aborted.load(Ordering::Acquire);
        if let Some(sender) = self.sender.lock().as_ref() {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            let _ = sender.send(Task::Session { payload, aborted });
        }
    }

    pub fn add_idle_task(&self) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Task::Idle);
        }
    }

    pub fn add_timer_task(&self) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Task::Timer);
        }
    }

    /// Marks every task dispatched from now on as aborted. Already-queued
    /// tasks are not retroactively marked (a bounded best-effort, matching
    /// spec §4.2's "aborted tasks are still delivered... worker may skip").
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Closes the queue and blocks until every in-flight task has drained
    /// and every worker has exited.
    pub fn finish(&self) {
        self.sender.lock().take(); // drop the only Sender: closes the channel
        let handles = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            let _ = h.join();
        }
    }

    pub fn count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire) as usize
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
