//! Shared timer pool for update-token deadlines.
//!
//! Acquired tokens register an expiry here; a single cooperative reaper
//! ticks four times a second, pops everything due and fans the cleanup
//! out over `clamp(active_records / records_per_worker, 1, max_workers)`
//! workers. There are no per-record timer threads. A token consumed
//! before its deadline simply makes the queued entry a no-op.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::record::Record;
use super::settings::settings;

const TICK: Duration = Duration::from_millis(250);

pub struct Expiry {
    deadline: Instant,
    record: Weak<Record>,
    field: String,
    token: String,
}

impl PartialEq for Expiry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Expiry {}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

static QUEUE: Lazy<Mutex<BinaryHeap<Reverse<Expiry>>>> = Lazy::new(Mutex::default);

/// Register a token deadline with the pool.
pub fn schedule(record: &Arc<Record>, field: &str, token: &str, deadline: Instant) {
    QUEUE.lock().push(Reverse(Expiry {
        deadline,
        record: Arc::downgrade(record),
        field: field.to_owned(),
        token: token.to_owned(),
    }));
}

/// Pop every entry whose deadline has elapsed.
fn due(now: Instant) -> Vec<Expiry> {
    let mut queue = QUEUE.lock();
    let mut due = Vec::new();

    while let Some(Reverse(head)) = queue.peek() {
        if head.deadline > now {
            break;
        }
        due.push(queue.pop().unwrap().0);
    }

    due
}

/// Entries waiting on a deadline.
pub fn pending() -> usize {
    QUEUE.lock().len()
}

/// Run the reaper until shutdown. Stops at the next tick boundary.
pub fn spawn_reaper(shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(TICK) => reap().await,
            }
        }
    });
}

async fn reap() {
    let due = due(Instant::now());
    if due.is_empty() {
        return;
    }

    let workers = settings().token_workers();
    debug!("{} token deadline(s) due, {} worker(s)", due.len(), workers);

    let chunk = due.len().div_ceil(workers);
    let handles: Vec<_> = due
        .chunks(chunk)
        .map(|batch| {
            let batch: Vec<_> = batch
                .iter()
                .map(|e| (e.record.clone(), e.field.clone(), e.token.clone()))
                .collect();
            tokio::spawn(async move {
                for (record, field, token) in batch {
                    if let Some(record) = record.upgrade() {
                        record.clear_expired_token(&field, &token);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The queue is a process-wide singleton shared with other tests, so
    // assertions filter by this module's own field names.

    #[test]
    fn test_due_ordering() {
        let record = Record::new("db", "t", "r");
        let now = Instant::now();

        schedule(&record, "tokens_test_past", "t1", now - Duration::from_secs(1));
        schedule(&record, "tokens_test_future", "t2", now + Duration::from_secs(600));

        let due = due(now);
        assert!(due.iter().any(|e| e.field == "tokens_test_past"));
        assert!(!due.iter().any(|e| e.field == "tokens_test_future"));
    }

    #[tokio::test]
    async fn test_reap_skips_dropped_records() {
        let record = Record::new("db", "t", "r2");
        let deadline = Instant::now() - Duration::from_millis(1);
        schedule(&record, "tokens_test_dropped", "tok", deadline);
        drop(record);

        // The weak handle is dead; reaping must not panic and the entry
        // must not linger as due.
        reap().await;
        let remaining = super::due(Instant::now());
        assert!(!remaining.iter().any(|e| e.field == "tokens_test_dropped"));
    }
}
