//! Single-step draining of the pending job queue.

use tracing::{trace, warn};

use crate::core::{BridgeResult, JsException};
use crate::scripting::runtime::Runtime;

/// Outcome of one [`Runtime::drain_one_pending_job`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// One job ran to completion.
    Executed,
    /// The queue was empty; nothing ran.
    Empty,
    /// The job raised an exception. The exception has been taken off the
    /// context; later jobs are still queued.
    Failed(JsException),
}

impl JobStatus {
    pub fn is_empty(&self) -> bool {
        matches!(self, JobStatus::Empty)
    }
}

impl Runtime {
    /// Runs at most one queued job (a promise reaction, for example).
    ///
    /// Call it in a loop until it reports [`JobStatus::Empty`] to settle a
    /// promise chain. Must not be called from inside [`Runtime::enter`].
    pub fn drain_one_pending_job(&self) -> BridgeResult<JobStatus> {
        let _guard = self.enter_guard()?;
        match self.engine().execute_pending_job() {
            Ok(true) => {
                trace!(target: "jsbridge::jobs", "Job executed");
                Ok(JobStatus::Executed)
            }
            Ok(false) => Ok(JobStatus::Empty),
            Err(_) => {
                let exception = self.context().with(|ctx| JsException::catch(&ctx));
                warn!(target: "jsbridge::jobs", %exception, "Job failed");
                Ok(JobStatus::Failed(exception))
            }
        }
    }

    pub fn is_job_pending(&self) -> bool {
        self.engine().is_job_pending()
    }
}
