use std::time::Instant;

use kiln_contracts::jobs::{JobStatus, ProviderJob};
use serde_json::Value;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::config::PollPolicy;
use crate::extract::safety_verdict;
use crate::providers::{MediaProvider, OperationHandle, OperationStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollError {
    #[error("operation {handle} finished with an error: {message}")]
    Rejected {
        handle: String,
        message: String,
        raw: Option<Value>,
    },
    #[error("operation {handle} output was filtered for safety")]
    SafetyFiltered {
        handle: String,
        count: u64,
        reasons: Vec<String>,
        raw: Value,
    },
    #[error("operation {handle} did not finish within {seconds}s ({poll_errors} poll errors)")]
    Timeout {
        handle: String,
        seconds: u64,
        poll_errors: u32,
    },
    #[error("operation {handle} was cancelled")]
    Cancelled { handle: String },
}

/// Polls a long-running operation at a fixed interval until it finishes.
///
/// Each iteration waits first, then polls. Failed polls are counted on the job and
/// logged, never surfaced on their own; only the overall timeout ends a job that
/// keeps failing to poll. `on_tick` runs after every poll that reports not-done.
pub fn poll_to_completion(
    provider: &dyn MediaProvider,
    handle: &OperationHandle,
    job: &mut ProviderJob,
    policy: PollPolicy,
    cancel: &CancelToken,
    on_tick: &mut dyn FnMut(&ProviderJob),
) -> Result<Value, PollError> {
    let started = Instant::now();
    job.status = JobStatus::Polling;
    loop {
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            job.status = JobStatus::Failed;
            return Err(PollError::Timeout {
                handle: handle.name.clone(),
                seconds: policy.timeout.as_secs(),
                poll_errors: job.poll_errors,
            });
        }
        let remaining = policy.timeout - elapsed;
        if cancel.wait(policy.interval.min(remaining)) {
            job.status = JobStatus::Failed;
            return Err(PollError::Cancelled {
                handle: handle.name.clone(),
            });
        }

        job.polls += 1;
        let status = match provider.poll_operation(handle) {
            Ok(status) => status,
            Err(err) => {
                job.poll_errors += 1;
                tracing::warn!(
                    operation = %handle.name,
                    poll = job.polls,
                    poll_errors = job.poll_errors,
                    transient = err.transient,
                    error = %err,
                    "operation poll failed; will retry"
                );
                continue;
            }
        };

        if !status.done {
            if status.progress.is_some() {
                job.progress = status.progress;
            }
            tracing::debug!(operation = %handle.name, poll = job.polls, "operation still running");
            on_tick(job);
            continue;
        }
        return finish(handle, job, status);
    }
}

fn finish(
    handle: &OperationHandle,
    job: &mut ProviderJob,
    status: OperationStatus,
) -> Result<Value, PollError> {
    if let Some(error) = status.error {
        job.status = JobStatus::Failed;
        let message = match error.code {
            Some(code) => format!("{} (code {code})", error.message),
            None => error.message,
        };
        return Err(PollError::Rejected {
            handle: handle.name.clone(),
            message,
            raw: status.response,
        });
    }
    let response = status.response.unwrap_or(Value::Null);
    if let Some((count, reasons)) = safety_verdict(&response) {
        job.status = JobStatus::Failed;
        return Err(PollError::SafetyFiltered {
            handle: handle.name.clone(),
            count,
            reasons,
            raw: response,
        });
    }
    job.status = JobStatus::Succeeded;
    job.progress = Some(100.0);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use kiln_contracts::errors::ProviderCallError;
    use kiln_contracts::providers::ProviderKind;
    use serde_json::json;

    use super::*;

    struct ScriptedOperation {
        script: Mutex<VecDeque<Result<OperationStatus, ProviderCallError>>>,
    }

    impl ScriptedOperation {
        fn new(script: Vec<Result<OperationStatus, ProviderCallError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl MediaProvider for ScriptedOperation {
        fn name(&self) -> ProviderKind {
            ProviderKind::Veo
        }

        fn poll_operation(&self, _handle: &OperationHandle) -> Result<OperationStatus, ProviderCallError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(OperationStatus::pending()))
        }
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn flaky() -> Result<OperationStatus, ProviderCallError> {
        Err(ProviderCallError::new(ProviderKind::Veo, "connection reset").transient())
    }

    fn run(
        provider: &ScriptedOperation,
        policy: PollPolicy,
        cancel: &CancelToken,
    ) -> (Result<Value, PollError>, ProviderJob, u32) {
        let handle = OperationHandle::new("operations/test");
        let mut job = ProviderJob::submitted(ProviderKind::Veo, Some(handle.name.clone()));
        let mut ticks = 0;
        let result = poll_to_completion(provider, &handle, &mut job, policy, cancel, &mut |_| {
            ticks += 1
        });
        (result, job, ticks)
    }

    #[test]
    fn transient_poll_errors_do_not_fail_the_job() {
        let provider = ScriptedOperation::new(vec![
            flaky(),
            Ok(OperationStatus::pending()),
            flaky(),
            Ok(OperationStatus::finished(json!({"video": {"uri": "gs://out.mp4"}}))),
        ]);
        let (result, job, ticks) = run(&provider, fast_policy(), &CancelToken::new());
        assert_eq!(result.unwrap()["video"]["uri"], json!("gs://out.mp4"));
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.poll_errors, 2);
        assert_eq!(job.polls, 4);
        assert_eq!(ticks, 1);
    }

    #[test]
    fn persistent_poll_errors_end_in_timeout() {
        let provider = ScriptedOperation::new((0..10_000).map(|_| flaky()).collect());
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(60),
        };
        let (result, job, _) = run(&provider, policy, &CancelToken::new());
        assert!(matches!(result, Err(PollError::Timeout { .. })));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.poll_errors > 0);
    }

    #[test]
    fn cancel_interrupts_the_wait() {
        let provider = ScriptedOperation::new(Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let policy = PollPolicy {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(600),
        };
        let started = Instant::now();
        let (result, _, ticks) = run(&provider, policy, &cancel);
        assert!(matches!(result, Err(PollError::Cancelled { .. })));
        assert_eq!(ticks, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn done_with_error_is_rejected() {
        let mut status = OperationStatus::finished(json!({}));
        status.error = Some(crate::providers::OperationError {
            code: Some(3),
            message: "invalid prompt".to_string(),
        });
        let provider = ScriptedOperation::new(vec![Ok(status)]);
        let (result, job, _) = run(&provider, fast_policy(), &CancelToken::new());
        match result {
            Err(PollError::Rejected { message, .. }) => assert_eq!(message, "invalid prompt (code 3)"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn filtered_media_count_is_safety_filtered() {
        let provider = ScriptedOperation::new(vec![Ok(OperationStatus::finished(json!({
            "generateVideoResponse": {
                "raiMediaFilteredCount": 1,
                "raiMediaFilteredReasons": ["celebrity likeness"]
            }
        })))]);
        let (result, _, _) = run(&provider, fast_policy(), &CancelToken::new());
        match result {
            Err(PollError::SafetyFiltered { count, reasons, .. }) => {
                assert_eq!(count, 1);
                assert_eq!(reasons, vec!["celebrity likeness".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
