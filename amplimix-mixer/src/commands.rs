//! The command queue (C11): a single-producer/single-consumer FIFO from the
//! control thread to the audio thread, applied once at the start of each
//! `Mix` call, before any layer state is read (spec §4.11, §5).

use crossbeam_queue::ArrayQueue;

/// One queued mutation: a zero-argument closure returning whether it
/// actually took effect (spec §4.11: "a queued command may fail... failure
/// is silent"). Control-thread callers close over whatever `Arc`s they need
/// (the layer pool, the bus tree, a specific token) rather than the queue
/// passing context in.
pub type Command = Box<dyn FnOnce() -> bool + Send>;

/// What `enqueue` does when the ring is full (spec §4.11: "the control
/// thread may either drop or spin, configurable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    Drop,
    Spin,
}

pub struct CommandQueue {
    ring: ArrayQueue<Command>,
    policy: FullPolicy,
}

impl CommandQueue {
    pub fn new(capacity: usize, policy: FullPolicy) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
            policy,
        }
    }

    /// Nonblocking (under `Drop`) or spin-waiting (under `Spin`) enqueue.
    /// Never takes a lock; safe to call from the control thread at any
    /// time, including concurrently with a Mix call in progress (those
    /// commands are observed at the *next* Mix, spec §5).
    pub fn enqueue(&self, mut cmd: Command) {
        loop {
            match self.ring.push(cmd) {
                Ok(()) => return,
                Err(returned) => {
                    cmd = returned;
                    match self.policy {
                        FullPolicy::Drop => return,
                        FullPolicy::Spin => std::hint::spin_loop(),
                    }
                }
            }
        }
    }

    /// Drains every currently-queued command, in FIFO order, ignoring each
    /// one's success/failure. Called exactly once per Mix call, before any
    /// layer is read.
    pub fn drain(&self) {
        while let Some(cmd) = self.ring.pop() {
            let _ = cmd();
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn drain_runs_commands_in_fifo_order() {
        let queue = CommandQueue::new(8, FullPolicy::Drop);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            queue.enqueue(Box::new(move || {
                order.lock().unwrap().push(i);
                true
            }));
        }
        queue.drain();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_policy_discards_when_full() {
        let queue = CommandQueue::new(2, FullPolicy::Drop);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            queue.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                true
            }));
        }
        assert!(queue.len() <= 2);
        queue.drain();
        assert!(counter.load(Ordering::Relaxed) <= 2);
    }

    #[test]
    fn commands_enqueued_during_drain_wait_for_next_drain() {
        let queue = CommandQueue::new(4, FullPolicy::Drop);
        queue.enqueue(Box::new(|| true));
        queue.drain();
        assert!(queue.is_empty());
        queue.enqueue(Box::new(|| true));
        assert_eq!(queue.len(), 1);
    }
}
