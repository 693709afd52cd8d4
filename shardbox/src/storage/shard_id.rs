//! Process-unique 63-bit shard identifiers.
//!
//! Layout: 41 bits of milliseconds since the shardbox epoch, 22 bits of
//! per-millisecond sequence. The sign bit stays clear so identifiers fit
//! an `i64` and sort by creation time. Identifiers recovered from shard
//! file names predate anything generated in this process, so the two
//! never collide.

use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

const SEQUENCE_BITS: u64 = 22;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_BITS: u64 = 41;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;
// 2024-01-01T00:00:00Z
const SHARDBOX_EPOCH: u64 = 1_704_067_200_000;

#[derive(Default)]
struct State {
    last_timestamp_ms: u64,
    sequence: u64,
}

static STATE: Lazy<Mutex<State>> = Lazy::new(Mutex::default);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime is before UNIX_EPOCH")
        .as_millis() as u64
}

/// Generate the next shard identifier.
pub fn next() -> i64 {
    let mut state = STATE.lock();
    let mut now = now_ms();

    if now <= state.last_timestamp_ms {
        now = state.last_timestamp_ms;
        state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
        // Wraparound within one millisecond; move to the next.
        if state.sequence == 0 {
            now += 1;
        }
    } else {
        state.sequence = 0;
    }

    state.last_timestamp_ms = now;

    let elapsed = (now - SHARDBOX_EPOCH) & MAX_TIMESTAMP;
    ((elapsed << SEQUENCE_BITS) | state.sequence) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_and_positive() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = next();
            assert!(id > 0);
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_monotonic() {
        let a = next();
        let b = next();
        assert!(b > a);
    }
}
