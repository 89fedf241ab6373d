//! 未処理アカウントのクレーム
//!
//! `New` のレコードを読み、まだ `New` のものだけを条件付きで `Processing` に進める。
//! 読み取りと書き込みの間に他ワーカーが取ったレコードは黙って落とす。

use std::sync::Arc;

use tracing::debug;

use crate::account::AccountStatus;
use crate::error::EngineError;
use crate::traits::AccountStore;

/// `claim_batch` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// このワーカーが取得したID（候補の順序のまま）
    Claimed(Vec<String>),
    /// 候補は全て他ワーカーに取られた。未処理は残っている可能性がある
    Contended,
    /// `New` のレコードが残っていない
    Exhausted,
}

#[derive(Clone)]
pub struct ClaimEngine {
    store: Arc<dyn AccountStore>,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    pub async fn claim_batch(
        &self,
        partition: &str,
        max_size: usize,
    ) -> Result<ClaimOutcome, EngineError> {
        let candidates = self
            .store
            .find_by_status(partition, AccountStatus::New, max_size.max(1))
            .await?;

        if candidates.is_empty() {
            let remaining = self
                .store
                .count_by_status(partition, AccountStatus::New)
                .await?;
            return Ok(if remaining == 0 {
                ClaimOutcome::Exhausted
            } else {
                ClaimOutcome::Contended
            });
        }

        let ids: Vec<String> = candidates.into_iter().map(|a| a.id).collect();
        let claimed = self
            .store
            .conditional_update_many(
                partition,
                &ids,
                AccountStatus::New,
                AccountStatus::Processing,
            )
            .await?;

        if claimed.is_empty() {
            debug!("Lost claim race for {} candidates in {}", ids.len(), partition);
            return Ok(ClaimOutcome::Contended);
        }

        if claimed.len() < ids.len() {
            debug!(
                "Claimed {}/{} candidates in {} (rest taken by other workers)",
                claimed.len(),
                ids.len(),
                partition
            );
        }

        // ストアの返却順に依らず候補順に並べる
        let ordered = ids
            .into_iter()
            .filter(|id| claimed.contains(id))
            .collect();
        Ok(ClaimOutcome::Claimed(ordered))
    }

    /// 未着手のまま持っているリースを `New` に戻す
    pub async fn release(&self, partition: &str, ids: &[String]) -> Result<usize, EngineError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let released = self
            .store
            .conditional_update_many(
                partition,
                ids,
                AccountStatus::Processing,
                AccountStatus::New,
            )
            .await?;
        Ok(released.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;
    use crate::account::{Account, AccountUpdate, InsertSummary, NewAccount};
    use crate::store::InMemoryAccountStore;

    async fn seeded(n: usize) -> Arc<InMemoryAccountStore> {
        let store = Arc::new(InMemoryAccountStore::new());
        let accounts = (0..n).map(|i| NewAccount::new(format!("{:03}", i), "t")).collect();
        store.insert_many("p", accounts).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_claim_until_exhausted() {
        let store = seeded(12).await;
        let engine = ClaimEngine::new(store.clone());

        let first = engine.claim_batch("p", 10).await.unwrap();
        let ClaimOutcome::Claimed(first) = first else {
            panic!("expected a claim");
        };
        assert_eq!(first.len(), 10);
        assert_eq!(first[0], "000");

        let second = engine.claim_batch("p", 10).await.unwrap();
        assert_eq!(second, ClaimOutcome::Claimed(vec!["010".into(), "011".into()]));

        assert_eq!(engine.claim_batch("p", 10).await.unwrap(), ClaimOutcome::Exhausted);
        assert_eq!(
            store.count_by_status("p", AccountStatus::Processing).await.unwrap(),
            12
        );
    }

    #[tokio::test]
    async fn test_unknown_partition_is_exhausted() {
        let store = seeded(1).await;
        let engine = ClaimEngine::new(store);
        assert_eq!(engine.claim_batch("nope", 5).await.unwrap(), ClaimOutcome::Exhausted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_disjoint() {
        let store = seeded(25).await;
        let engine = ClaimEngine::new(store.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    match engine.claim_batch("p", 3).await.unwrap() {
                        ClaimOutcome::Claimed(ids) => mine.extend(ids),
                        ClaimOutcome::Contended => tokio::task::yield_now().await,
                        ClaimOutcome::Exhausted => break,
                    }
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 25);
        assert_eq!(unique.len(), 25);
    }

    #[tokio::test]
    async fn test_release_returns_to_new() {
        let store = seeded(3).await;
        let engine = ClaimEngine::new(store.clone());
        let ClaimOutcome::Claimed(ids) = engine.claim_batch("p", 3).await.unwrap() else {
            panic!("expected a claim");
        };

        assert_eq!(engine.release("p", &ids[1..]).await.unwrap(), 2);
        assert_eq!(store.count_by_status("p", AccountStatus::New).await.unwrap(), 2);
        assert_eq!(engine.release("p", &[]).await.unwrap(), 0);
    }

    /// 読み取り直後に別ワーカーが全候補を取っていくストア
    struct RacingStore {
        inner: InMemoryAccountStore,
    }

    #[async_trait]
    impl AccountStore for RacingStore {
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
            self.inner
                .conditional_update_many(partition, ids, expected, new_status)
                .await?;
            self.inner
                .conditional_update_many(partition, ids, expected, new_status)
                .await
        }

        async fn update_one(
            &self,
            partition: &str,
            id: &str,
            update: AccountUpdate,
        ) -> Result<bool, EngineError> {
            self.inner.update_one(partition, id, update).await
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
            self.inner.insert_many(partition, accounts).await
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

    #[tokio::test]
    async fn test_lost_race_is_contended_not_exhausted() {
        let store = RacingStore {
            inner: InMemoryAccountStore::new(),
        };
        store
            .insert_many("p", vec![NewAccount::new("1", "t"), NewAccount::new("2", "t")])
            .await
            .unwrap();
        let engine = ClaimEngine::new(Arc::new(store));

        assert_eq!(engine.claim_batch("p", 5).await.unwrap(), ClaimOutcome::Contended);
    }
}
