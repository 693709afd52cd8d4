//! Operation counters, kept per record and aggregated at table scope.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Insert,
    Update,
    Delete,
    Acquire,
}

/// Success/failure counters per operation, plus acquisitions and a
/// catch-all total.
#[derive(Debug, Default)]
pub struct OpStats {
    get_success: AtomicU64,
    get_failure: AtomicU64,
    insert_success: AtomicU64,
    insert_failure: AtomicU64,
    update_success: AtomicU64,
    update_failure: AtomicU64,
    delete_success: AtomicU64,
    delete_failure: AtomicU64,
    acquire: AtomicU64,
    any: AtomicU64,
}

impl OpStats {
    pub fn record(&self, op: Op, success: bool) {
        let counter = match (op, success) {
            (Op::Get, true) => &self.get_success,
            (Op::Get, false) => &self.get_failure,
            (Op::Insert, true) => &self.insert_success,
            (Op::Insert, false) => &self.insert_failure,
            (Op::Update, true) => &self.update_success,
            (Op::Update, false) => &self.update_failure,
            (Op::Delete, true) => &self.delete_success,
            (Op::Delete, false) => &self.delete_failure,
            (Op::Acquire, _) => &self.acquire,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.any.fetch_add(1, Ordering::Relaxed);
    }

    pub fn any(&self) -> u64 {
        self.any.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "get": {
                "success": self.get_success.load(Ordering::Relaxed),
                "failure": self.get_failure.load(Ordering::Relaxed),
            },
            "insert": {
                "success": self.insert_success.load(Ordering::Relaxed),
                "failure": self.insert_failure.load(Ordering::Relaxed),
            },
            "update": {
                "success": self.update_success.load(Ordering::Relaxed),
                "failure": self.update_failure.load(Ordering::Relaxed),
            },
            "delete": {
                "success": self.delete_success.load(Ordering::Relaxed),
                "failure": self.delete_failure.load(Ordering::Relaxed),
            },
            "acquire": self.acquire.load(Ordering::Relaxed),
            "any": self.any.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = OpStats::default();
        stats.record(Op::Get, true);
        stats.record(Op::Get, false);
        stats.record(Op::Update, true);
        stats.record(Op::Acquire, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot["get"]["success"], 1);
        assert_eq!(snapshot["get"]["failure"], 1);
        assert_eq!(snapshot["update"]["success"], 1);
        assert_eq!(snapshot["acquire"], 1);
        assert_eq!(snapshot["any"], 4);
    }
}
