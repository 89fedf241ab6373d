use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tower::Service;
use tracing::info;

use crate::error::EngineError;
use crate::pool::{PoolController, PoolStatus};

/// コントロールプレーンからのリクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    Start {
        partition: Option<String>,
        workers: Option<usize>,
    },
    Pause,
    Resume,
    Stop,
    Status {
        partition: Option<String>,
    },
    RetryFailed {
        partition: Option<String>,
    },
    Collections,
}

impl ControlRequest {
    pub fn start(partition: impl Into<String>, workers: usize) -> Self {
        ControlRequest::Start {
            partition: Some(partition.into()),
            workers: Some(workers),
        }
    }

    pub fn status(partition: impl Into<String>) -> Self {
        ControlRequest::Status {
            partition: Some(partition.into()),
        }
    }
}

/// レスポンス（そのままJSONで返せる形）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlResponse {
    Started {
        partition: String,
        workers: usize,
        max_workers: usize,
    },
    PauseRequested,
    ResumeRequested,
    StopRequested,
    Status(PoolStatus),
    RetryScheduled {
        partition: String,
        count: u64,
    },
    Collections {
        collections: Vec<String>,
        current: Option<String>,
    },
}

/// tower::Serviceを実装したコントロールサービス
#[derive(Clone)]
pub struct ControlService {
    pool: Arc<PoolController>,
}

impl ControlService {
    pub fn new(pool: Arc<PoolController>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<PoolController> {
        &self.pool
    }

    async fn handle(
        pool: Arc<PoolController>,
        req: ControlRequest,
    ) -> Result<ControlResponse, EngineError> {
        match req {
            ControlRequest::Start { partition, workers } => {
                let partition =
                    partition.unwrap_or_else(|| pool.config().default_partition.clone());
                let requested = workers.unwrap_or(pool.config().max_workers);
                let workers = pool.start(&partition, requested).await?;
                Ok(ControlResponse::Started {
                    partition,
                    workers,
                    max_workers: pool.config().max_workers,
                })
            }
            ControlRequest::Pause => {
                pool.pause()?;
                Ok(ControlResponse::PauseRequested)
            }
            ControlRequest::Resume => {
                pool.resume()?;
                Ok(ControlResponse::ResumeRequested)
            }
            ControlRequest::Stop => {
                pool.stop()?;
                Ok(ControlResponse::StopRequested)
            }
            ControlRequest::Status { partition } => {
                Ok(ControlResponse::Status(pool.status(partition.as_deref()).await?))
            }
            ControlRequest::RetryFailed { partition } => {
                let partition = pool.resolve_partition(partition.as_deref()).await;
                let count = pool.retry_failed(Some(&partition)).await?;
                Ok(ControlResponse::RetryScheduled { partition, count })
            }
            ControlRequest::Collections => {
                let collections = pool.list_partitions().await?;
                let current = if pool.control().active_workers() > 0 {
                    Some(pool.resolve_partition(None).await)
                } else {
                    None
                };
                Ok(ControlResponse::Collections {
                    collections,
                    current,
                })
            }
        }
    }
}

impl Service<ControlRequest> for ControlService {
    type Response = ControlResponse;
    type Error = EngineError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ControlRequest) -> Self::Future {
        info!("Control request: {:?}", req);
        let pool = self.pool.clone();
        Box::pin(Self::handle(pool, req))
    }
}
