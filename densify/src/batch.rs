//! Batch processing of independent items (normally reference groups)
//!
//! A pool of worker tasks request jobs from, and return results to, a controller.
//! Each request carries the result of the task's previous job (if any).  The
//! controller replies with the index of the next item to process, or None when
//! there is nothing left (or the batch has been stopped), at which point the task
//! exits.  Processing ends when all tasks have exited.
//!
//! Failed items are counted.  When the number of failures reaches the failure quota
//! the controller stops handing out jobs and the report is frozen at that point.
//! A fatal (configuration) error stops the batch immediately and is returned as an
//! error.
use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{is_fatal, is_recoverable};

pub const DEFAULT_MAX_FAILURES: usize = 100;
pub const DEFAULT_RETRY_ATTEMPTS: usize = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

pub trait BatchItem {
    fn id(&self) -> &str;
}

/// Bounded retry for recoverable fetch errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Call f until it succeeds, returns an error that is not recoverable,
/// or the attempts from policy are used up
pub fn with_retries<T, F>(policy: &RetryPolicy, what: &str, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f() {
            Ok(x) => return Ok(x),
            Err(e) if attempt < policy.attempts && is_recoverable(&e) => {
                warn!(
                    "Attempt {} of {} for {} failed: {:#}; retrying in {:?}",
                    attempt, policy.attempts, what, e, policy.delay
                );
                thread::sleep(policy.delay)
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    threads: usize,
    max_failures: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            threads: 1,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl BatchPolicy {
    pub fn new(threads: usize, max_failures: usize) -> Self {
        Self {
            threads: threads.max(1),
            max_failures: max_failures.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn max_failures(&self) -> usize {
        self.max_failures
    }
}

/// Outcome of a batch.  If aborted is set then examined gives the number of items
/// for which results had been received when the failure quota was reached.
#[derive(Debug, Clone)]
pub struct BatchReport {
    successes: usize,
    failed_ids: Vec<String>,
    examined: usize,
    total: usize,
    aborted: bool,
    elapsed: Duration,
}

impl BatchReport {
    pub fn successes(&self) -> usize {
        self.successes
    }
    pub fn failed_ids(&self) -> &[String] {
        &self.failed_ids
    }
    pub fn n_failed(&self) -> usize {
        self.failed_ids.len()
    }
    pub fn examined(&self) -> usize {
        self.examined
    }
    pub fn total(&self) -> usize {
        self.total
    }
    pub fn aborted(&self) -> bool {
        self.aborted
    }
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Result of a job returned from a task
enum Completed {
    Success(usize),
    Failure(usize, anyhow::Error),
    None, // Initial request from a task
}

impl fmt::Debug for Completed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(i) => write!(f, "Completed::Success({})", i),
            Self::Failure(i, _) => write!(f, "Completed::Failure({})", i),
            Self::None => f.write_str("Completed::None"),
        }
    }
}

#[derive(Debug)]
struct JobRequest {
    prev_results: Completed,
    task_idx: usize,
}

fn process_task<T, F>(
    items: &[T],
    f: &F,
    ix: usize,
    snd: Sender<JobRequest>,
    recv: Receiver<Option<usize>>,
) -> anyhow::Result<()>
where
    F: Fn(&T) -> anyhow::Result<()>,
{
    debug!("Batch task {} starting up", ix);
    snd.send(JobRequest {
        prev_results: Completed::None,
        task_idx: ix,
    })
    .map_err(|_| anyhow!("Error sending request from task {}", ix))?;

    while let Some(i) = recv.recv()? {
        trace!("Task {} received item {}", ix, i);
        let res = match f(&items[i]) {
            Ok(()) => Completed::Success(i),
            Err(e) => Completed::Failure(i, e),
        };
        snd.send(JobRequest {
            prev_results: res,
            task_idx: ix,
        })
        .map_err(|_| anyhow!("Error sending results from task {}", ix))?;
    }
    debug!("Batch task {} closing down", ix);
    Ok(())
}

/// Frozen state after the batch has been stopped
enum Stopped {
    Quota { successes: usize, examined: usize },
    Fatal(anyhow::Error),
}

fn controller<T: BatchItem>(
    items: &[T],
    max_failures: usize,
    r: Receiver<JobRequest>,
    svec: Vec<Sender<Option<usize>>>,
) -> (usize, Vec<String>, Option<Stopped>) {
    debug!("Batch controller starting up");
    let mut next_item = 0;
    let mut successes = 0;
    let mut failed_ids = Vec::new();
    let mut stopped: Option<Stopped> = None;

    while let Ok(jr) = r.recv() {
        trace!("Controller received request {:?}", jr);
        match jr.prev_results {
            Completed::Success(i) if stopped.is_some() => {
                debug!("Ignoring result for {} received after batch was stopped", items[i].id())
            }
            Completed::Failure(i, e) if stopped.is_some() => {
                warn!("{} failed after batch was stopped: {:#}", items[i].id(), e)
            }
            Completed::Success(i) => {
                debug!("Finished processing {}", items[i].id());
                successes += 1;
            }
            Completed::Failure(i, e) => {
                let id = items[i].id();
                if is_fatal(&e) {
                    error!("Fatal error processing {}", id);
                    stopped = Some(Stopped::Fatal(e.context(format!("Error processing {}", id))))
                } else {
                    error!("Processing of {} failed: {:#}", id, e);
                    failed_ids.push(id.to_owned());
                    if failed_ids.len() >= max_failures {
                        let examined = successes + failed_ids.len();
                        error!(
                            "Giving up after {} failures in first {} items",
                            failed_ids.len(),
                            examined
                        );
                        stopped = Some(Stopped::Quota {
                            successes,
                            examined,
                        })
                    }
                }
            }
            Completed::None => (),
        }

        let job = if stopped.is_none() && next_item < items.len() {
            next_item += 1;
            Some(next_item - 1)
        } else {
            None
        };
        trace!("Controller sending {:?} to task {}", job, jr.task_idx);
        if svec[jr.task_idx].send(job).is_err() {
            error!("Error sending message to task {}", jr.task_idx)
        }
    }
    debug!("Batch controller closing down");
    (successes, failed_ids, stopped)
}

/// Process all items with f using a pool of policy.threads() tasks
pub fn run_batch<T, F>(items: &[T], policy: &BatchPolicy, f: F) -> anyhow::Result<BatchReport>
where
    T: BatchItem + Sync,
    F: Fn(&T) -> anyhow::Result<()> + Sync,
{
    let start = Instant::now();
    let nt = policy.threads.min(items.len()).max(1);
    debug!("Processing {} items with {} tasks", items.len(), nt);

    let (successes, failed_ids, stopped, task_results) = thread::scope(|sc| {
        // Channel for a task to request a new job
        let (send_ctrl, recv_ctrl) = bounded(nt * 8);

        // Storage for channels by which a task receives a new job
        let mut send_job = Vec::with_capacity(nt);

        let f = &f;
        let join_handles: Vec<_> = (0..nt)
            .map(|ix| {
                let (s, r) = bounded(1);
                send_job.push(s);
                let s = send_ctrl.clone();
                sc.spawn(move || process_task(items, f, ix, s, r))
            })
            .collect();
        drop(send_ctrl);

        let (successes, failed_ids, stopped) =
            controller(items, policy.max_failures, recv_ctrl, send_job);
        let task_results: Vec<_> = join_handles.into_iter().map(|jh| jh.join()).collect();
        (successes, failed_ids, stopped, task_results)
    });

    for (ix, r) in task_results.into_iter().enumerate() {
        match r {
            Ok(res) => res.map_err(|e| e.context(format!("Error from batch task {}", ix)))?,
            Err(_) => return Err(anyhow!("Error joining batch task {}", ix)),
        }
    }

    let elapsed = start.elapsed();
    let total = items.len();
    match stopped {
        Some(Stopped::Fatal(e)) => Err(e),
        Some(Stopped::Quota {
            successes,
            examined,
        }) => Ok(BatchReport {
            successes,
            failed_ids,
            examined,
            total,
            aborted: true,
            elapsed,
        }),
        None => Ok(BatchReport {
            successes,
            failed_ids,
            examined: total,
            total,
            aborted: false,
            elapsed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DensifyError;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    struct Item(String);

    impl BatchItem for Item {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn items(n: usize) -> Vec<Item> {
        (0..n).map(|i| Item(format!("sp{}", i))).collect()
    }

    #[test]
    fn all_succeed() {
        let v = items(20);
        let seen = Mutex::new(Vec::new());
        let rep = run_batch(&v, &BatchPolicy::new(4, 100), |it| {
            seen.lock().unwrap().push(it.id().to_owned());
            Ok(())
        })
        .unwrap();
        assert!(!rep.aborted());
        assert_eq!(rep.successes(), 20);
        assert_eq!(rep.n_failed(), 0);
        assert_eq!(rep.examined(), 20);
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn failures_below_quota_are_reported() {
        let v = items(10);
        let rep = run_batch(&v, &BatchPolicy::new(3, 100), |it| {
            if it.id().ends_with('3') || it.id().ends_with('7') {
                Err(anyhow!("synthetic failure"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert!(!rep.aborted());
        assert_eq!(rep.successes(), 8);
        let mut f = rep.failed_ids().to_vec();
        f.sort();
        assert_eq!(f, vec!["sp3".to_string(), "sp7".to_string()]);
        assert_eq!(rep.total(), 10);
    }

    #[test]
    fn quota_stops_batch() {
        // 150 items, the first 100 all fail
        let v = items(150);
        let calls = AtomicUsize::new(0);
        let rep = run_batch(&v, &BatchPolicy::new(1, 100), |it| {
            calls.fetch_add(1, Ordering::SeqCst);
            let i: usize = it.id()[2..].parse().unwrap();
            if i < 100 {
                Err(anyhow!("synthetic failure"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert!(rep.aborted());
        assert_eq!(rep.n_failed(), 100);
        assert_eq!(rep.examined(), 100);
        assert_eq!(rep.successes(), 0);
        assert_eq!(rep.total(), 150);
        // No item is started after the quota is reached
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn quota_counts_interleaved_successes() {
        let v = items(150);
        let rep = run_batch(&v, &BatchPolicy::new(1, 5), |it| {
            let i: usize = it.id()[2..].parse().unwrap();
            if i % 2 == 1 {
                Err(anyhow!("synthetic failure"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert!(rep.aborted());
        assert_eq!(rep.n_failed(), 5);
        // sp1, sp3, .., sp9 fail; sp0, .., sp8 succeed
        assert_eq!(rep.successes(), 5);
        assert_eq!(rep.examined(), 10);
    }

    #[test]
    fn fatal_error_stops_batch() {
        let v = items(50);
        let r = run_batch(&v, &BatchPolicy::new(1, 100), |it| {
            if it.id() == "sp2" {
                Err(DensifyError::EmptyReference("sp2.fa".to_string()).into())
            } else {
                Ok(())
            }
        });
        let e = r.unwrap_err();
        assert!(is_fatal(&e));
        assert!(format!("{:#}", e).contains("sp2"));
    }

    #[test]
    fn retries_recoverable_errors() {
        let policy = RetryPolicy::new(2, Duration::from_millis(0));
        let mut n = 0;
        let r = with_retries(&policy, "test", || {
            n += 1;
            if n == 1 {
                Err(DensifyError::fetch("x", "transient").into())
            } else {
                Ok(n)
            }
        });
        assert_eq!(r.unwrap(), 2);

        let mut n = 0;
        let r: anyhow::Result<()> = with_retries(&policy, "test", || {
            n += 1;
            Err(DensifyError::fetch("x", "still down").into())
        });
        assert!(r.is_err());
        assert_eq!(n, 2);

        // Other errors are not retried
        let mut n = 0;
        let r: anyhow::Result<()> = with_retries(&policy, "test", || {
            n += 1;
            Err(anyhow!("parse error"))
        });
        assert!(r.is_err());
        assert_eq!(n, 1);
    }
}
