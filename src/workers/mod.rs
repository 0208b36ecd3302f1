use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinSet, time::sleep};
use tracing::{error, info, warn};

use crate::{
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod notify;

#[derive(Debug, PartialEq, Eq)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Runs `concurrency` polling loops against the same queue. Jobs are
    /// reserved with `SKIP LOCKED`, so loops never pick up the same row.
    pub async fn run_pool(self: Arc<Self>, concurrency: usize) {
        let concurrency = concurrency.max(1);
        info!(concurrency, "notification worker pool started");

        let mut loops = JoinSet::new();
        for _ in 0..concurrency {
            let worker = self.clone();
            loops.spawn(async move { worker.run().await });
        }
        while let Some(result) = loops.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "worker loop exited unexpectedly");
            }
        }
    }

    /// Processes at most one job. Returns true when a job was picked up.
    pub async fn run_once(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(%err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };

        let Some(job) = reserve_job(&mut conn, &job_types)? else {
            return Ok(false);
        };
        drop(conn);

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            if let Ok(mut conn) = self.state.db() {
                mark_job_failed(&mut conn, job.id, "no handler registered")?;
            }
            return Ok(true);
        };

        let job_id = job.id;
        let job_type = job.job_type.clone();
        let attempts = job.attempts;
        let result = handler.handle(self.state.clone(), job).await;

        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(%job_id, %err, "failed to record job result due to pool error");
                return Ok(true);
            }
        };
        match result {
            JobExecution::Success => {
                mark_job_succeeded(&mut conn, job_id)?;
                info!(%job_id, %job_type, attempts, "job completed");
            }
            JobExecution::Retry { delay, error } => {
                warn!(%job_id, %job_type, attempts, %error, retry_in_secs = delay.as_secs(), "job will retry");
                retry_job_after(&mut conn, job_id, delay, &error)?;
            }
            JobExecution::Failed { error } => {
                error!(%job_id, %job_type, attempts, %error, "job failed");
                mark_job_failed(&mut conn, job_id, &error)?;
            }
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(notify::SendNotificationJob::new())]
}
