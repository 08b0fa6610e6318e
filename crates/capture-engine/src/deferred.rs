//! Tasks handed to the render thread.
//!
//! Session teardown may touch resources the render thread assumes exclusive
//! access to, so workers never release them inline. Instead they schedule a
//! task here and the render thread runs it from its own loop via
//! [`DeferredQueue::run_pending`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// A unit of work to run on the render thread.
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Create a connected sender/queue pair. The queue stays on the render thread.
pub fn deferred_queue() -> (DeferredSender, DeferredQueue) {
    let (tx, rx) = mpsc::channel();
    (DeferredSender { tx }, DeferredQueue { rx })
}

/// Cloneable handle used by worker threads to schedule render-thread work.
#[derive(Clone)]
pub struct DeferredSender {
    tx: Sender<DeferredTask>,
}

impl DeferredSender {
    /// Schedule `task`. Returns `false` if the render thread's queue is gone,
    /// in which case the task is dropped without running.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Receiving side, drained by the render thread.
pub struct DeferredQueue {
    rx: Receiver<DeferredTask>,
}

impl DeferredQueue {
    /// Run every task already scheduled without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Block up to `timeout` for one task, run it, then run anything else
    /// already pending. Returns how many ran.
    pub fn run_next(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn tasks_run_on_the_draining_thread() {
        let (sender, queue) = deferred_queue();
        let render_thread = thread::current().id();
        let observed = Arc::new(std::sync::Mutex::new(None));

        let worker = {
            let observed = observed.clone();
            thread::spawn(move || {
                assert!(sender.schedule(move || {
                    *observed.lock().unwrap() = Some(thread::current().id());
                }));
            })
        };
        worker.join().unwrap();

        assert!(observed.lock().unwrap().is_none());
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*observed.lock().unwrap(), Some(render_thread));
    }

    #[test]
    fn run_next_waits_for_a_task() {
        let (sender, queue) = deferred_queue();
        let count = Arc::new(AtomicUsize::new(0));
        let worker = {
            let count = count.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                sender.schedule(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            })
        };
        assert_eq!(queue.run_next(Duration::from_secs(5)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
        assert_eq!(queue.run_next(Duration::from_millis(10)), 0);
    }

    #[test]
    fn schedule_reports_a_dropped_queue() {
        let (sender, queue) = deferred_queue();
        drop(queue);
        assert!(!sender.schedule(|| {}));
    }
}
