//! Background loop that picks up pending import jobs.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    app::{context::RequestContext, importer::ImportProcessor},
    config::ImportConfig,
    store::Store,
};

pub struct ImportWorker {
    store: Store,
    processor: ImportProcessor,
    poll_every: Duration,
    max_running: usize,
    stale_after: Duration,
    running: JoinSet<()>,
}

impl ImportWorker {
    pub fn new(store: Store, processor: ImportProcessor, config: &ImportConfig) -> Self {
        Self {
            store,
            processor,
            poll_every: Duration::from_secs(config.poll_secs),
            max_running: config.batch_size,
            stale_after: Duration::from_secs(config.stale_after_secs),
            running: JoinSet::new(),
        }
    }

    /// Fail jobs left in `processing` by a previous run.
    pub async fn reclaim_stale(&self) {
        let ctx = RequestContext::anonymous();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after).unwrap_or_else(|_| chrono::Duration::hours(1));
        match self.store.fail_stale_jobs(&ctx, cutoff).await {
            Ok(0) => {}
            Ok(n) => log::warn!("marked {n} interrupted import jobs as failed"),
            Err(err) => log::error!("failed to reclaim stale import jobs: {err}"),
        }
    }

    /// Reap finished jobs and start pending ones in the free slots.
    /// Returns how many jobs were started.
    pub async fn poll(&mut self, shutdown: &CancellationToken) -> usize {
        while let Some(res) = self.running.try_join_next() {
            log_join(res);
        }

        let free = self.max_running.saturating_sub(self.running.len());
        if free == 0 {
            return 0;
        }

        let ctx = RequestContext::anonymous();
        let jobs = match self.store.pending_jobs(&ctx, free).await {
            Ok(jobs) => jobs,
            Err(err) => {
                log::error!("get pending jobs: {err}");
                return 0;
            }
        };

        let started = jobs.len();
        for job in jobs {
            let processor = self.processor.clone();
            let job_ctx = RequestContext::child_of(shutdown);
            self.running.spawn(async move {
                if let Err(err) = processor.run_job(&job_ctx, &job).await {
                    log::error!("import job {}: {err}", job.id);
                }
            });
        }
        started
    }

    /// Wait for every started job to finish.
    pub async fn drain(&mut self) {
        while let Some(res) = self.running.join_next().await {
            log_join(res);
        }
    }

    /// Poll until `shutdown` fires, then wait for running jobs to wind down.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.reclaim_stale().await;
        log::info!("import worker started");

        let mut ticker = tokio::time::interval(self.poll_every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll(&shutdown).await;
                }
            }
        }

        self.drain().await;
        log::info!("import worker stopped");
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(err) = res {
        log::error!("import job task panicked: {err}");
    }
}
