//! Process-wide runtime coordination: the client task tracker and the
//! shutdown signal background tasks poll.

use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct Comms {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

static COMMS: Lazy<Comms> = Lazy::new(|| Comms {
    tracker: TaskTracker::new(),
    shutdown: CancellationToken::new(),
});

pub fn comms() -> &'static Comms {
    &COMMS
}

impl Comms {
    /// Tracker for in-flight client connections.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Token handed to every background task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Begin shutdown: background tasks stop at their next iteration
    /// boundary.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
