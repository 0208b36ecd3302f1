use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    jobs::{retry_delay, JOB_SEND_NOTIFICATION, MAX_JOB_ATTEMPTS},
    models::Job,
    notifier::Notification,
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub struct SendNotificationJob;

impl SendNotificationJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendNotificationJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a delivery failure on the given attempt to a retry or a final failure.
pub fn delivery_failure(attempts: i32, error: String) -> JobExecution {
    if attempts >= MAX_JOB_ATTEMPTS {
        JobExecution::Failed { error }
    } else {
        JobExecution::Retry {
            delay: retry_delay(attempts),
            error,
        }
    }
}

#[async_trait]
impl JobHandler for SendNotificationJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_NOTIFICATION
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let notification: Notification = match serde_json::from_value(job.payload.clone()) {
            Ok(notification) => notification,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid notification payload: {err}"),
                }
            }
        };

        match notification.deliver(state.notifier.as_ref()).await {
            Ok(()) => JobExecution::Success,
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    kind = notification.kind(),
                    attempts = job.attempts,
                    error = %err,
                    "notification delivery failed"
                );
                delivery_failure(job.attempts, format!("{err:#}"))
            }
        }
    }
}
