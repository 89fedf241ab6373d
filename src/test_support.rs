//! テスト用の抽出器・接続確認のスタブ

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::account::{
    Account, AccountStatus, AccountUpdate, BillSummary, InsertSummary, NewAccount,
};
use crate::error::{EngineError, ExtractFailure};
use crate::store::InMemoryAccountStore;
use crate::traits::{AccountStore, Connectivity, ExtractSession, Extractor};

/// プロセス内で一意な一時ファイルパス
pub fn temp_path(name: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let unique = format!(
        "{}-{}-{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::SeqCst),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    std::env::temp_dir()
        .join(format!("bill-scraper-test-{}", unique))
        .join(format!("{}.json", name))
}

pub fn summary(amount: f64) -> BillSummary {
    BillSummary::from_amounts([("April25", Some(amount))])
}

/// (アカウントID, そのIDでの呼び出し回数 1始まり) → 結果
type Script = dyn Fn(&str, u32) -> Result<BillSummary, ExtractFailure> + Send + Sync;

#[derive(Default)]
struct Counters {
    calls: Mutex<HashMap<String, u32>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

pub struct ScriptedExtractor {
    script: Arc<Script>,
    delay: Duration,
    failing_sessions: AtomicUsize,
    counters: Arc<Counters>,
}

impl ScriptedExtractor {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, u32) -> Result<BillSummary, ExtractFailure> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            delay: Duration::ZERO,
            failing_sessions: AtomicUsize::new(0),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(summary(100.0)))
    }

    /// 1回の抽出にかかる時間
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 最初の `n` 回のセッション生成を失敗させる
    pub fn with_failing_sessions(self, n: usize) -> Self {
        self.failing_sessions.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls_for(&self, id: &str) -> u32 {
        self.calls().get(id).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> HashMap<String, u32> {
        self.counters.calls.lock().unwrap().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn new_session(&self) -> Result<Box<dyn ExtractSession>, EngineError> {
        let failed = self
            .failing_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EngineError::Session("browser failed to launch".into()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            delay: self.delay,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    delay: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl ExtractSession for ScriptedSession {
    async fn extract(&mut self, account_id: &str) -> Result<BillSummary, ExtractFailure> {
        let attempt = {
            let mut calls = self.counters.calls.lock().unwrap();
            let n = calls.entry(account_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(account_id, attempt)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 外部から切り替えられる接続状態
#[derive(Default)]
pub struct SwitchConnectivity {
    offline: AtomicBool,
    checks: AtomicUsize,
}

impl SwitchConnectivity {
    pub fn online() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connectivity for SwitchConnectivity {
    async fn is_online(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        !self.offline.load(Ordering::SeqCst)
    }
}

/// 状態遷移をアカウントごとに記録するストア
///
/// 指定したIDへの結果書き込みは `StoreUnavailable` で失敗させられる。
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryAccountStore,
    history: Mutex<HashMap<String, Vec<AccountStatus>>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_for(&self, id: &str) {
        self.failing_writes.lock().unwrap().insert(id.to_string());
    }

    /// ID → 観測した状態の列（取り込み時の `New` から）
    pub fn history(&self) -> HashMap<String, Vec<AccountStatus>> {
        self.history.lock().unwrap().clone()
    }

    fn push(&self, id: &str, status: AccountStatus) {
        self.history
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(status);
    }
}

#[async_trait]
impl AccountStore for RecordingStore {
    async fn find_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
        limit: usize,
    ) -> Result<Vec<Account>, EngineError> {
        self.inner.find_by_status(partition, status, limit).await
    }

    async fn conditional_update_many(
        &self,
        partition: &str,
        ids: &[String],
        expected: AccountStatus,
        new_status: AccountStatus,
    ) -> Result<Vec<String>, EngineError> {
        let updated = self
            .inner
            .conditional_update_many(partition, ids, expected, new_status)
            .await?;
        for id in &updated {
            self.push(id, new_status);
        }
        Ok(updated)
    }

    async fn update_one(
        &self,
        partition: &str,
        id: &str,
        update: AccountUpdate,
    ) -> Result<bool, EngineError> {
        if self.failing_writes.lock().unwrap().contains(id) {
            return Err(EngineError::StoreUnavailable("write rejected".into()));
        }
        let status = match &update {
            AccountUpdate::Processed { .. } => AccountStatus::Processed,
            AccountUpdate::Failed { .. } => AccountStatus::Failed,
        };
        let applied = self.inner.update_one(partition, id, update).await?;
        if applied {
            self.push(id, status);
        }
        Ok(applied)
    }

    async fn count_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
    ) -> Result<u64, EngineError> {
        self.inner.count_by_status(partition, status).await
    }

    async fn distinct_tags(&self, partition: &str) -> Result<Vec<String>, EngineError> {
        self.inner.distinct_tags(partition).await
    }

    async fn insert_many(
        &self,
        partition: &str,
        accounts: Vec<NewAccount>,
    ) -> Result<InsertSummary, EngineError> {
        let ids: Vec<String> = accounts.iter().map(|a| a.id.clone()).collect();
        let summary = self.inner.insert_many(partition, accounts).await?;
        let mut history = self.history.lock().unwrap();
        for id in ids {
            history.entry(id).or_insert_with(|| vec![AccountStatus::New]);
        }
        Ok(summary)
    }

    async fn reset_failed(&self, partition: &str) -> Result<u64, EngineError> {
        self.inner.reset_failed(partition).await
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<Account>, EngineError> {
        self.inner.get(partition, id).await
    }

    async fn list_partitions(&self) -> Result<Vec<String>, EngineError> {
        self.inner.list_partitions().await
    }
}
