use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::account::{Account, AccountStatus, AccountUpdate, InsertSummary, NewAccount};
use crate::error::EngineError;
use crate::traits::AccountStore;

/// 1パーティション分のレコード（挿入順を保持）
#[derive(Debug, Default)]
struct Partition {
    records: Vec<Account>,
    index: HashMap<String, usize>,
}

impl Partition {
    fn get_mut(&mut self, id: &str) -> Option<&mut Account> {
        let idx = *self.index.get(id)?;
        self.records.get_mut(idx)
    }
}

/// プロセス内メモリのアカウントストア
///
/// すべての操作を1つのロック内で行うため、条件付き更新は原子的になる。
#[derive(Debug)]
pub struct InMemoryAccountStore {
    partitions: Mutex<HashMap<String, Partition>>,
    available: AtomicBool,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 障害注入用: false の間は全操作が `StoreUnavailable` を返す
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// パーティション内の全レコード（挿入順）
    pub fn snapshot(&self, partition: &str) -> Result<Vec<Account>, EngineError> {
        let guard = self.lock()?;
        Ok(guard
            .get(partition)
            .map(|p| p.records.clone())
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Partition>>, EngineError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable(
                "in-memory store marked unavailable".into(),
            ));
        }
        self.partitions
            .lock()
            .map_err(|e| EngineError::StoreUnavailable(format!("lock poisoned: {}", e)))
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
        limit: usize,
    ) -> Result<Vec<Account>, EngineError> {
        let guard = self.lock()?;
        Ok(guard
            .get(partition)
            .map(|p| {
                p.records
                    .iter()
                    .filter(|a| a.status == status)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn conditional_update_many(
        &self,
        partition: &str,
        ids: &[String],
        expected: AccountStatus,
        new_status: AccountStatus,
    ) -> Result<Vec<String>, EngineError> {
        let mut guard = self.lock()?;
        let Some(part) = guard.get_mut(partition) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = part.get_mut(id) {
                if account.status == expected {
                    account.status = new_status;
                    updated.push(id.clone());
                }
            }
        }

        debug!(
            "conditional update {} -> {}: {}/{} matched in {}",
            expected,
            new_status,
            updated.len(),
            ids.len(),
            partition
        );
        Ok(updated)
    }

    async fn update_one(
        &self,
        partition: &str,
        id: &str,
        update: AccountUpdate,
    ) -> Result<bool, EngineError> {
        let mut guard = self.lock()?;
        Ok(guard
            .get_mut(partition)
            .and_then(|p| p.get_mut(id))
            .map(|account| account.apply(update))
            .unwrap_or(false))
    }

    async fn count_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
    ) -> Result<u64, EngineError> {
        let guard = self.lock()?;
        Ok(guard
            .get(partition)
            .map(|p| p.records.iter().filter(|a| a.status == status).count() as u64)
            .unwrap_or(0))
    }

    async fn distinct_tags(&self, partition: &str) -> Result<Vec<String>, EngineError> {
        let guard = self.lock()?;
        let tags: BTreeSet<String> = guard
            .get(partition)
            .map(|p| p.records.iter().map(|a| a.tag.clone()).collect())
            .unwrap_or_default();
        Ok(tags.into_iter().collect())
    }

    async fn insert_many(
        &self,
        partition: &str,
        accounts: Vec<NewAccount>,
    ) -> Result<InsertSummary, EngineError> {
        let mut guard = self.lock()?;
        let part = guard.entry(partition.to_string()).or_default();

        let mut summary = InsertSummary::default();
        let mut seen = HashSet::new();
        for new in accounts {
            let id = new.id.trim();
            if id.is_empty() {
                summary.skipped += 1;
                continue;
            }
            if part.index.contains_key(id) || !seen.insert(id.to_string()) {
                summary.skipped += 1;
                continue;
            }
            part.index.insert(id.to_string(), part.records.len());
            part.records.push(Account::new(partition, id, new.tag));
            summary.inserted += 1;
        }

        info!(
            "Inserted {} accounts into {} ({} skipped)",
            summary.inserted, partition, summary.skipped
        );
        Ok(summary)
    }

    async fn reset_failed(&self, partition: &str) -> Result<u64, EngineError> {
        let mut guard = self.lock()?;
        let Some(part) = guard.get_mut(partition) else {
            return Ok(0);
        };
        let mut count = 0u64;
        for account in part.records.iter_mut() {
            if account.reset() {
                count += 1;
            }
        }
        info!("Reset {} failed accounts in {}", count, partition);
        Ok(count)
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<Account>, EngineError> {
        let guard = self.lock()?;
        Ok(guard.get(partition).and_then(|p| {
            p.index.get(id).and_then(|&idx| p.records.get(idx)).cloned()
        }))
    }

    async fn list_partitions(&self) -> Result<Vec<String>, EngineError> {
        let guard = self.lock()?;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
