//! Bounded mono sample queue between the pipeline thread and the audio output.
//!
//! The driver pushes processed samples (normalized `f32`), an optional resampler thread moves
//! them between two queues, and the CPAL callback drains the last one without blocking.
//! `close()` lets producers and consumers shut down deterministically.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe bounded FIFO of mono `f32` samples.
///
/// A single [`Condvar`] signals any state change; the `closed` flag lives under the same mutex
/// as the samples so a waiter can never miss it.
#[derive(Debug)]
pub struct SampleQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct Inner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// How [`SampleQueue::pop`] waits for data.
#[derive(Clone, Copy, Debug)]
pub enum PopStrategy {
    /// Wait for exactly `samples`; `None` if the queue closes first.
    BlockingExact { samples: usize },
    /// Wait for at least one sample, then take up to `max_samples`.
    BlockingUpTo { max_samples: usize },
    /// Take up to `max_samples` of whatever is ready; `None` when empty.
    NonBlocking { max_samples: usize },
}

/// Queue capacity for `seconds` of audio at `rate_hz`, falling back to two seconds.
pub fn capacity_for(rate_hz: u32, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    ((rate_hz as f32 * secs).ceil() as usize).max(1)
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered samples right now; may change as soon as this returns.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Stop accepting samples and wake every waiter. Buffered samples can still be drained.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns how many samples were accepted. That is fewer than `samples.len()` when the queue
    /// closes, or when no space frees up for `stall_timeout` (the consumer has stopped).
    pub fn push_blocking(&self, samples: &[f32], stall_timeout: Duration) -> usize {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            let mut deadline = Instant::now() + stall_timeout;
            while g.samples.len() >= self.capacity && !g.closed {
                let now = Instant::now();
                if now >= deadline {
                    return offset;
                }
                let before = g.samples.len();
                let (next, _) = self
                    .cv
                    .wait_timeout(g, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                g = next;
                if g.samples.len() < before {
                    deadline = Instant::now() + stall_timeout;
                }
            }
            if g.closed {
                return offset;
            }

            let room = self.capacity - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Pop samples using `strategy`. `None` means the request cannot be satisfied.
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take = match strategy {
            PopStrategy::BlockingExact { samples } => {
                while g.samples.len() < samples && !g.closed {
                    g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
                }
                if g.samples.len() < samples {
                    return None;
                }
                samples
            }
            PopStrategy::BlockingUpTo { max_samples } => {
                while g.samples.is_empty() && !g.closed {
                    g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
                }
                g.samples.len().min(max_samples)
            }
            PopStrategy::NonBlocking { max_samples } => g.samples.len().min(max_samples),
        };
        if take == 0 {
            return None;
        }

        let out: Vec<f32> = g.samples.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait until the queue is empty, giving up after `timeout`. Returns `true` once drained.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while !g.samples.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = next;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn capacity_for_falls_back_on_bad_durations() {
        assert_eq!(capacity_for(48_000, 0.5), 24_000);
        assert_eq!(capacity_for(48_000, -1.0), 96_000);
        assert_eq!(capacity_for(48_000, f32::NAN), 96_000);
        assert_eq!(capacity_for(48_000, f32::INFINITY), 96_000);
    }

    #[test]
    fn pop_nonblocking_empty() {
        let q = SampleQueue::new(16);
        assert!(q.pop(PopStrategy::NonBlocking { max_samples: 4 }).is_none());
    }

    #[test]
    fn pop_nonblocking_returns_available_samples() {
        let q = SampleQueue::new(64);
        q.push_blocking(&[1.0, 2.0, 3.0], Duration::from_millis(10));
        let out = q.pop(PopStrategy::NonBlocking { max_samples: 2 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pop_blocking_exact_waits_for_enough_samples() {
        let q = Arc::new(SampleQueue::new(64));
        let consumer = q.clone();
        let handle = thread::spawn(move || {
            consumer
                .pop(PopStrategy::BlockingExact { samples: 5 })
                .unwrap()
        });

        q.push_blocking(&[0.1, 0.2, 0.3], Duration::from_millis(10));
        q.push_blocking(&[0.4, 0.5], Duration::from_millis(10));
        assert_eq!(handle.join().unwrap(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn pop_blocking_up_to_drains_tail_then_sees_close() {
        let q = Arc::new(SampleQueue::new(64));
        q.push_blocking(&[1.0, 2.0], Duration::from_millis(10));
        q.close();
        let out = q.pop(PopStrategy::BlockingUpTo { max_samples: 8 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
        assert!(q.pop(PopStrategy::BlockingUpTo { max_samples: 8 }).is_none());
        assert!(q.pop(PopStrategy::BlockingExact { samples: 1 }).is_none());
    }

    #[test]
    fn push_gives_up_when_consumer_stalls() {
        let q = SampleQueue::new(4);
        let pushed = q.push_blocking(&[0.0; 10], Duration::from_millis(20));
        assert_eq!(pushed, 4);
    }

    #[test]
    fn push_blocks_until_consumer_frees_space() {
        let q = Arc::new(SampleQueue::new(4));
        let consumer = q.clone();
        let handle = thread::spawn(move || {
            let mut got = Vec::new();
            while got.len() < 10 {
                if let Some(mut v) = consumer.pop(PopStrategy::BlockingUpTo { max_samples: 3 }) {
                    got.append(&mut v);
                }
            }
            got
        });

        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert_eq!(q.push_blocking(&input, Duration::from_secs(5)), 10);
        assert_eq!(handle.join().unwrap(), input);
    }

    #[test]
    fn push_after_close_is_rejected() {
        let q = SampleQueue::new(8);
        q.close();
        assert_eq!(q.push_blocking(&[1.0], Duration::from_millis(10)), 0);
        assert!(q.is_closed());
    }

    #[test]
    fn wait_until_drained_times_out_with_data() {
        let q = SampleQueue::new(8);
        assert!(q.wait_until_drained(Duration::from_millis(5)));
        q.push_blocking(&[1.0], Duration::from_millis(5));
        assert!(!q.wait_until_drained(Duration::from_millis(10)));
    }
}
