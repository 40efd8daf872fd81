//! Bounded worker pool for per-location work.
//!
//! A producer feeds item indices into a bounded channel, `workers` threads run
//! the task, and the calling thread is the single writer that collects
//! results. Cancellation stops the producer; workers drain whatever was
//! already queued without running it.

use crate::concurrency::CancelToken;
use crossbeam_channel::bounded;
use std::thread;

/// What a pool run produced, keyed by index into the input slice.
#[derive(Debug)]
pub struct PoolOutcome<R> {
    pub completed: Vec<(usize, R)>,
    pub failed: Vec<(usize, String)>,
    pub cancelled: bool,
}

impl<R> PoolOutcome<R> {
    fn new() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Number of workers to use when none is configured.
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Run `task` over every item on `workers` threads.
///
/// A task error fails only its own item. The outcome is marked cancelled when
/// `cancel` fired before every item was processed.
pub fn run<T, R, F>(items: &[T], workers: usize, cancel: &CancelToken, task: F) -> PoolOutcome<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, String> + Sync,
{
    let mut outcome = PoolOutcome::new();
    if items.is_empty() {
        return outcome;
    }
    let workers = workers.clamp(1, items.len());
    let (job_tx, job_rx) = bounded::<usize>(workers * 2);
    let (result_tx, result_rx) = bounded::<(usize, Result<R, String>)>(workers * 2);
    let task = &task;

    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            s.spawn(move || {
                for index in job_rx {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    if result_tx.send((index, task(&items[index]))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(job_rx);

        let producer_cancel = cancel.clone();
        s.spawn(move || {
            for index in 0..items.len() {
                if producer_cancel.is_cancelled() || job_tx.send(index).is_err() {
                    break;
                }
            }
        });

        for (index, result) in result_rx {
            match result {
                Ok(value) => outcome.completed.push((index, value)),
                Err(reason) => outcome.failed.push((index, reason)),
            }
        }
    });

    outcome.completed.sort_by_key(|(i, _)| *i);
    outcome.failed.sort_by_key(|(i, _)| *i);
    outcome.cancelled = cancel.is_cancelled() && outcome.processed() < items.len();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_item_processed_once() {
        let items: Vec<u32> = (0..500).collect();
        let calls = AtomicUsize::new(0);
        let outcome = run(&items, 8, &CancelToken::new(), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(n * 2)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 500);
        assert_eq!(outcome.completed.len(), 500);
        assert!(outcome.completed.iter().all(|(i, v)| *v == items[*i] * 2));
        assert!(!outcome.cancelled);
    }

    #[test]
    fn failures_are_isolated() {
        let items = vec!["a", "bad", "c"];
        let outcome = run(&items, 2, &CancelToken::new(), |s| {
            if *s == "bad" {
                Err(format!("cannot read {s}"))
            } else {
                Ok(s.len())
            }
        });
        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(outcome.failed, vec![(1, "cannot read bad".to_owned())]);
    }

    #[test]
    fn cancelled_before_start_dispatches_nothing() {
        let items: Vec<u32> = (0..100).collect();
        let token = CancelToken::new();
        token.cancel();
        let outcome = run(&items, 4, &token, |n| Ok(*n));
        assert!(outcome.completed.is_empty());
        assert!(outcome.cancelled);
    }

    #[test]
    fn cancellation_midway_keeps_partial_results() {
        let items: Vec<u32> = (0..10_000).collect();
        let token = CancelToken::new();
        let outcome = run(&items, 2, &token, |n| {
            if *n == 50 {
                token.cancel();
            }
            Ok(*n)
        });
        assert!(outcome.cancelled);
        assert!(!outcome.completed.is_empty());
        assert!(outcome.completed.len() < items.len());
    }

    #[test]
    fn empty_input() {
        let items: Vec<u8> = Vec::new();
        let outcome = run(&items, 4, &CancelToken::new(), |_| Ok(()));
        assert_eq!(outcome.processed(), 0);
        assert!(!outcome.cancelled);
    }
}
