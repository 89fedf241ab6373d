//! ワーカープールの制御（開始・一時停止・再開・停止・状態取得）

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::account::AccountStatus;
use crate::config::EngineConfig;
use crate::control::{RunControl, RunState};
use crate::error::EngineError;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::traits::{AccountStore, Connectivity, Extractor};
use crate::worker::{Worker, WorkerContext, WorkerReport};

/// 状態別の件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub new: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
}

/// コントロールプレーン向けの状態スナップショット
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub partition: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub tags: Vec<String>,
    pub state: RunState,
    pub processing_active: bool,
    pub paused: bool,
    pub stopping: bool,
    pub active_workers: usize,
    pub max_workers: usize,
    pub progress: ProgressSnapshot,
}

#[derive(Default)]
struct RunHandles {
    partition: Option<String>,
    workers: Vec<JoinHandle<WorkerReport>>,
}

pub struct PoolController {
    ctx: WorkerContext,
    extractor: Arc<dyn Extractor>,
    run: Mutex<RunHandles>,
}

impl PoolController {
    /// 前回実行の進捗ファイルを読み込んで作成
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn AccountStore>,
        extractor: Arc<dyn Extractor>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::open(&config.status_file).await);
        Self {
            ctx: WorkerContext {
                store,
                connectivity,
                progress,
                control: Arc::new(RunControl::new()),
                config: Arc::new(config),
            },
            extractor,
            run: Mutex::new(RunHandles::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.ctx.control
    }

    /// ワーカーを起動し、実際に起動した数を返す
    ///
    /// 稼働中のワーカーが1つでも残っていれば `AlreadyRunning`。
    pub async fn start(&self, partition: &str, workers: usize) -> Result<usize, EngineError> {
        let mut run = self.run.lock().await;
        let control = &self.ctx.control;

        if control.active_workers() > 0 {
            let current = run.partition.clone().unwrap_or_default();
            return Err(EngineError::AlreadyRunning(current));
        }

        let count = self.ctx.config.clamp_workers(workers);
        if let Err(e) = self.ctx.progress.reset().await {
            warn!("Couldn't persist progress reset: {}", e);
        }

        // 前回の終了済みタスクは破棄
        run.workers.clear();

        // 枠を全て確保してから Running にする。早く終わったワーカーや
        // 前回のワーカーが実行を Idle に戻さないようにするため
        let slots: Vec<_> = (0..count).map(|_| control.enter_worker()).collect();
        control.begin_run();
        for (i, slot) in slots.into_iter().enumerate() {
            let worker = Worker::new(i + 1, partition, self.ctx.clone());
            run.workers
                .push(tokio::spawn(worker.run(self.extractor.clone(), slot)));
        }
        run.partition = Some(partition.to_string());

        info!(
            "Processing started with {} workers on partition {} (max {})",
            count, partition, self.ctx.config.max_workers
        );
        Ok(count)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.ctx.control.pause()?;
        info!("Pause requested");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.ctx.control.resume()?;
        info!("Resume requested");
        Ok(())
    }

    /// 停止要求。抽出中のアカウントは完了まで待ってからワーカーが抜ける
    pub fn stop(&self) -> Result<(), EngineError> {
        self.ctx.control.stop()?;
        info!("Stop requested");
        Ok(())
    }

    /// 全ワーカーの終了を待ち、各ワーカーの結果を返す
    pub async fn wait_finished(&self) -> Vec<WorkerReport> {
        let handles = std::mem::take(&mut self.run.lock().await.workers);
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Worker task ended abnormally: {}", e),
            }
        }
        reports
    }

    /// 指定なしなら実行中（直近）のパーティション、それも無ければ既定値
    pub async fn resolve_partition(&self, partition: Option<&str>) -> String {
        match partition {
            Some(p) => p.to_string(),
            None => self
                .run
                .lock()
                .await
                .partition
                .clone()
                .unwrap_or_else(|| self.ctx.config.default_partition.clone()),
        }
    }

    pub async fn status(&self, partition: Option<&str>) -> Result<PoolStatus, EngineError> {
        let partition = self.resolve_partition(partition).await;
        let store = &self.ctx.store;

        let mut counts = StatusCounts::default();
        for status in AccountStatus::ALL {
            let n = store.count_by_status(&partition, status).await?;
            match status {
                AccountStatus::New => counts.new = n,
                AccountStatus::Processing => counts.processing = n,
                AccountStatus::Processed => counts.processed = n,
                AccountStatus::Failed => counts.failed = n,
            }
            counts.total += n;
        }
        let tags = store.distinct_tags(&partition).await?;

        let control = &self.ctx.control;
        let state = control.state();
        Ok(PoolStatus {
            partition,
            counts,
            tags,
            state,
            processing_active: control.active_workers() > 0,
            paused: state == RunState::Paused,
            stopping: state == RunState::Stopping,
            active_workers: control.active_workers(),
            max_workers: self.ctx.config.max_workers,
            progress: self.ctx.progress.snapshot().await,
        })
    }

    /// 失敗したアカウントを再処理対象に戻す
    pub async fn retry_failed(&self, partition: Option<&str>) -> Result<u64, EngineError> {
        let partition = self.resolve_partition(partition).await;
        let count = self.ctx.store.reset_failed(&partition).await?;
        info!("Marked {} failed accounts in {} for retry", count, partition);
        Ok(count)
    }

    pub async fn list_partitions(&self) -> Result<Vec<String>, EngineError> {
        self.ctx.store.list_partitions().await
    }
}
