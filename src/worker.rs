//! ワーカー: クレーム → 抽出（リトライ付き）→ 書き戻し のループ
//!
//! 1ワーカーは1つの抽出セッションを生存期間中使い続け、バッチ内のアカウントを
//! 順番に処理する。一時停止・停止はアカウントの合間でのみ確認する。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::account::{truncate_chars, AccountUpdate, BillSummary};
use crate::claim::{ClaimEngine, ClaimOutcome};
use crate::config::EngineConfig;
use crate::control::{Checkpoint, RunControl, WorkerSlot};
use crate::progress::{BatchTally, ProgressTracker};
use crate::traits::{AccountStore, Connectivity, ExtractSession, Extractor};

/// ログに出すエラー文の長さ
const LOG_REASON_CHARS: usize = 100;

/// ワーカー間で共有する依存
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn AccountStore>,
    pub connectivity: Arc<dyn Connectivity>,
    pub progress: Arc<ProgressTracker>,
    pub control: Arc<RunControl>,
    pub config: Arc<EngineConfig>,
}

/// ワーカーの終了理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// 未処理のアカウントが無くなった
    Exhausted,
    /// 停止要求を受けた
    Stopped,
    /// セッションを作れなかった
    SessionFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub processed: u64,
    pub failed: u64,
    pub exit: WorkerExit,
}

/// 1アカウントの処理結果
#[derive(Debug)]
enum AccountOutcome {
    Processed(BillSummary),
    Failed(String),
    /// 接続待ち中に停止要求。抽出せずにリースを返す
    Released,
}

pub struct Worker {
    id: usize,
    partition: String,
    ctx: WorkerContext,
    claims: ClaimEngine,
}

impl Worker {
    pub fn new(id: usize, partition: impl Into<String>, ctx: WorkerContext) -> Self {
        let claims = ClaimEngine::new(ctx.store.clone());
        Self {
            id,
            partition: partition.into(),
            ctx,
            claims,
        }
    }

    /// セッションを作ってループを回し、終了時にセッションを閉じる
    ///
    /// `slot` はこの関数を抜けた時点（panic を含む）で解放される。
    pub async fn run(self, extractor: Arc<dyn Extractor>, slot: WorkerSlot) -> WorkerReport {
        let _slot = slot;
        let mut report = WorkerReport {
            worker_id: self.id,
            processed: 0,
            failed: 0,
            exit: WorkerExit::Exhausted,
        };

        let mut session = match extractor.new_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("Worker {} could not open a session: {}", self.id, e);
                report.exit = WorkerExit::SessionFailed(e.to_string());
                return report;
            }
        };
        info!("Worker {} started for partition {}", self.id, self.partition);

        report.exit = self.run_loop(session.as_mut(), &mut report).await;

        if let Err(e) = session.close().await {
            warn!("Worker {} failed to close its session: {}", self.id, e);
        }
        info!(
            "Worker {} finished ({:?}): {} processed, {} failed",
            self.id, report.exit, report.processed, report.failed
        );
        report
    }

    async fn run_loop(
        &self,
        session: &mut dyn ExtractSession,
        report: &mut WorkerReport,
    ) -> WorkerExit {
        let config = &self.ctx.config;
        let control = &self.ctx.control;

        loop {
            if control.checkpoint().await == Checkpoint::Stop {
                return WorkerExit::Stopped;
            }

            let ids = match self.claims.claim_batch(&self.partition, config.batch_size).await {
                Ok(ClaimOutcome::Claimed(ids)) => ids,
                Ok(ClaimOutcome::Contended) => {
                    debug!("Worker {} lost the claim race, retrying", self.id);
                    if !control.sleep_unless_stopped(config.batch_pause).await {
                        return WorkerExit::Stopped;
                    }
                    continue;
                }
                Ok(ClaimOutcome::Exhausted) => {
                    info!(
                        "Worker {}: no more accounts to process in {}",
                        self.id, self.partition
                    );
                    return WorkerExit::Exhausted;
                }
                Err(e) => {
                    warn!(
                        "Worker {} could not claim a batch, backing off {:?}: {}",
                        self.id, config.store_backoff, e
                    );
                    if !control.sleep_unless_stopped(config.store_backoff).await {
                        return WorkerExit::Stopped;
                    }
                    continue;
                }
            };

            info!("Worker {} processing batch of {} accounts", self.id, ids.len());
            let (tally, stopped) = self.process_batch(session, &ids).await;
            report.processed += tally.processed;
            report.failed += tally.failed;
            self.record(tally).await;
            info!(
                "Worker {} batch results: {} success, {} failed",
                self.id, tally.processed, tally.failed
            );

            if stopped || !control.sleep_unless_stopped(config.batch_pause).await {
                return WorkerExit::Stopped;
            }
        }
    }

    /// バッチ内を順番に処理する。停止要求で抜けた場合は true
    async fn process_batch(
        &self,
        session: &mut dyn ExtractSession,
        ids: &[String],
    ) -> (BatchTally, bool) {
        let config = &self.ctx.config;
        let mut tally = BatchTally::default();

        for (pos, id) in ids.iter().enumerate() {
            if self.ctx.control.checkpoint().await == Checkpoint::Stop {
                self.release(&ids[pos..]).await;
                return (tally, true);
            }

            debug!("Worker {} processing account {}", self.id, id);
            match self.process_account(session, id).await {
                AccountOutcome::Processed(summary) => {
                    info!(
                        "Worker {} processed {}: highest={:?}",
                        self.id, id, summary.highest
                    );
                    if self.write(id, AccountUpdate::processed(summary)).await {
                        tally.processed += 1;
                    }
                }
                AccountOutcome::Failed(reason) => {
                    warn!(
                        "Worker {} gave up on {} after {} attempts: {}",
                        self.id,
                        id,
                        self.retry_budget(),
                        truncate_chars(&reason, LOG_REASON_CHARS)
                    );
                    let update = AccountUpdate::failed(
                        &reason,
                        self.retry_budget(),
                        config.error_max_chars,
                    );
                    if self.write(id, update).await {
                        tally.failed += 1;
                    }
                }
                AccountOutcome::Released => {
                    self.release(&ids[pos..]).await;
                    return (tally, true);
                }
            }
        }

        (tally, false)
    }

    /// 1アカウントの状態遷移: 抽出 → 成功 / 再試行待ち / 失敗
    async fn process_account(&self, session: &mut dyn ExtractSession, id: &str) -> AccountOutcome {
        let budget = self.retry_budget();
        let mut attempts = 0u32;

        loop {
            let failure = match session.extract(id).await {
                Ok(summary) => return AccountOutcome::Processed(summary),
                Err(failure) => failure,
            };

            if !failure.counts_against_budget() {
                warn!("Worker {} lost connectivity on {}: {}", self.id, id, failure);
                if !self.wait_for_connectivity().await {
                    return AccountOutcome::Released;
                }
                continue;
            }

            attempts += 1;
            let reason = failure.to_string();
            warn!(
                "Attempt {}/{} failed for {}: {}",
                attempts,
                budget,
                id,
                truncate_chars(&reason, LOG_REASON_CHARS)
            );
            if attempts >= budget {
                return AccountOutcome::Failed(reason);
            }
            // 待機中の停止要求は最後の理由で失敗扱い
            if !self
                .ctx
                .control
                .sleep_unless_stopped(self.ctx.config.retry_delay)
                .await
            {
                return AccountOutcome::Failed(reason);
            }
        }
    }

    /// 接続が戻るまでこのワーカーだけを止める。停止要求なら false
    async fn wait_for_connectivity(&self) -> bool {
        info!("Worker {} waiting for internet connection...", self.id);
        loop {
            if !self
                .ctx
                .control
                .sleep_unless_stopped(self.ctx.config.connectivity_poll)
                .await
            {
                info!("Worker {} stopped while waiting for connectivity", self.id);
                return false;
            }
            if self.ctx.connectivity.is_online().await {
                info!("Worker {}: internet connection restored", self.id);
                return true;
            }
        }
    }

    fn retry_budget(&self) -> u32 {
        self.ctx.config.max_retries.max(1)
    }

    async fn write(&self, id: &str, update: AccountUpdate) -> bool {
        match self.ctx.store.update_one(&self.partition, id, update).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    "Worker {}: account {} was no longer processing, result dropped",
                    self.id, id
                );
                false
            }
            Err(e) => {
                error!(
                    "Worker {} failed to write result for {} (left processing): {}",
                    self.id, id, e
                );
                false
            }
        }
    }

    async fn release(&self, ids: &[String]) {
        match self.claims.release(&self.partition, ids).await {
            Ok(0) => {}
            Ok(n) => info!("Worker {} released {} unstarted accounts", self.id, n),
            Err(e) => error!(
                "Worker {} failed to release {} accounts (left processing): {}",
                self.id,
                ids.len(),
                e
            ),
        }
    }

    async fn record(&self, tally: BatchTally) {
        if tally.is_empty() {
            return;
        }
        if let Err(e) = self.ctx.progress.record_batch(tally).await {
            warn!("Worker {} couldn't save progress: {}", self.id, e);
        }
    }
}
