//! Queue runtime command router.
//!
//! A thin async command queue that serializes every queue mutation — and the
//! worker pool's reads of the next job — through a single router task. Worker
//! terminal reports enter the same loop, so no mutation can race a dispatch.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::config::DownloadConfig;
use crate::core::fetcher::MediaFetcher;
use crate::core::manager::{EventReceiver, QueueManager, ReportReceiver, WorkerReport};
use crate::core::models::{AppError, AppResult, DownloadRequest, Job, JobId, QueueStats};

/// Commands understood by the runtime router.
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        request: DownloadRequest,
        respond_to: oneshot::Sender<AppResult<JobId>>,
    },
    Cancel {
        job_id: JobId,
        respond_to: oneshot::Sender<AppResult<bool>>,
    },
    ListJobs {
        respond_to: oneshot::Sender<AppResult<Vec<Job>>>,
    },
    GetJob {
        job_id: JobId,
        respond_to: oneshot::Sender<AppResult<Option<Job>>>,
    },
    Stats {
        respond_to: oneshot::Sender<AppResult<QueueStats>>,
    },
    ClearCompleted {
        respond_to: oneshot::Sender<AppResult<usize>>,
    },
    RetryFailed {
        respond_to: oneshot::Sender<AppResult<usize>>,
    },
    UpdateConfig {
        config: DownloadConfig,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<AppResult<()>>,
    },
}

/// Handle exposed to the CLI and any embedding surface.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub fn new(sender: mpsc::Sender<QueueCommand>) -> Self {
        Self { sender }
    }

    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> QueueCommand,
    ) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| AppError::Download(format!("Queue runtime unavailable: {}", e)))?;
        rx.await
            .map_err(|_| AppError::Download("Queue runtime dropped response".into()))?
    }

    pub async fn enqueue(&self, request: DownloadRequest) -> AppResult<JobId> {
        self.send_command(|tx| QueueCommand::Enqueue {
            request,
            respond_to: tx,
        })
        .await
    }

    pub async fn cancel(&self, job_id: JobId) -> AppResult<bool> {
        self.send_command(|tx| QueueCommand::Cancel {
            job_id,
            respond_to: tx,
        })
        .await
    }

    pub async fn list_jobs(&self) -> AppResult<Vec<Job>> {
        self.send_command(|tx| QueueCommand::ListJobs { respond_to: tx })
            .await
    }

    pub async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.send_command(|tx| QueueCommand::GetJob {
            job_id,
            respond_to: tx,
        })
        .await
    }

    pub async fn stats(&self) -> AppResult<QueueStats> {
        self.send_command(|tx| QueueCommand::Stats { respond_to: tx })
            .await
    }

    pub async fn clear_completed(&self) -> AppResult<usize> {
        self.send_command(|tx| QueueCommand::ClearCompleted { respond_to: tx })
            .await
    }

    pub async fn retry_failed(&self) -> AppResult<usize> {
        self.send_command(|tx| QueueCommand::RetryFailed { respond_to: tx })
            .await
    }

    pub async fn update_config(&self, config: DownloadConfig) -> AppResult<()> {
        self.send_command(|tx| QueueCommand::UpdateConfig {
            config,
            respond_to: tx,
        })
        .await
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.send_command(|tx| QueueCommand::Shutdown { respond_to: tx })
            .await
    }
}

/// Build the queue stack and spawn its router loop. Returns the command
/// handle and the event stream for the embedding surface.
pub fn spawn_queue_runtime(
    config: DownloadConfig,
    fetcher: Arc<dyn MediaFetcher>,
) -> (QueueHandle, EventReceiver) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let manager = QueueManager::new(config, fetcher, event_tx, report_tx);

    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let router_future = async move {
        router_loop(manager, cmd_rx, report_rx).await;
    };

    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(router_future);
        }
        Err(_) => {
            warn!("No tokio runtime found, creating dedicated thread with new runtime");
            std::thread::Builder::new()
                .name("queue-runtime".into())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_multi_thread()
                        .enable_all()
                        .thread_name("queue-runtime-worker")
                        .build()
                        .expect("queue runtime");
                    runtime.block_on(router_future);
                })
                .expect("spawn queue runtime thread");
        }
    }

    (QueueHandle::new(cmd_tx), event_rx)
}

async fn router_loop(
    mut manager: QueueManager,
    mut cmd_rx: mpsc::Receiver<QueueCommand>,
    mut report_rx: ReportReceiver,
) {
    info!("Queue router loop started");

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(command) => {
                    if handle_command(&mut manager, command).await {
                        break;
                    }
                }
                None => break,
            },
            report = report_rx.recv() => match report {
                Some(report) => handle_report(&mut manager, report),
                // Manager owns a report sender, so this channel outlives it.
                None => break,
            },
        }
    }

    debug!("Queue router loop exited");
}

fn handle_report(manager: &mut QueueManager, report: WorkerReport) {
    debug!("Worker report for job {}", report.job_id);
    manager.handle_report(report);
}

/// Returns true when the router should shut down.
async fn handle_command(manager: &mut QueueManager, command: QueueCommand) -> bool {
    match command {
        QueueCommand::Enqueue {
            request,
            respond_to,
        } => {
            let _ = respond_to.send(manager.enqueue(request));
        }
        QueueCommand::Cancel {
            job_id,
            respond_to,
        } => {
            let _ = respond_to.send(manager.cancel(job_id).await);
        }
        QueueCommand::ListJobs { respond_to } => {
            let _ = respond_to.send(Ok(manager.list_jobs()));
        }
        QueueCommand::GetJob {
            job_id,
            respond_to,
        } => {
            let _ = respond_to.send(Ok(manager.get_job(job_id)));
        }
        QueueCommand::Stats { respond_to } => {
            let _ = respond_to.send(Ok(manager.stats()));
        }
        QueueCommand::ClearCompleted { respond_to } => {
            let _ = respond_to.send(Ok(manager.clear_completed()));
        }
        QueueCommand::RetryFailed { respond_to } => {
            let _ = respond_to.send(Ok(manager.retry_failed()));
        }
        QueueCommand::UpdateConfig {
            config,
            respond_to,
        } => {
            manager.update_config(config);
            let _ = respond_to.send(Ok(()));
        }
        QueueCommand::Shutdown { respond_to } => {
            manager.stop();
            let _ = respond_to.send(Ok(()));
            return true;
        }
    }
    false
}
