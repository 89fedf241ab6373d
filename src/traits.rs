use async_trait::async_trait;

use crate::account::{
    Account, AccountStatus, AccountUpdate, BillSummary, InsertSummary, NewAccount,
};
use crate::error::{EngineError, ExtractFailure};

/// アカウントの永続ストア
///
/// ワーカー間の排他は `conditional_update_many` の比較交換だけで成立する。
/// 実装はこの操作を原子的に行うこと。
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 指定状態のレコードを最大 `limit` 件取得
    async fn find_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
        limit: usize,
    ) -> Result<Vec<Account>, EngineError>;

    /// `expected` 状態のままのレコードだけを `new_status` に更新し、更新できたIDを返す
    async fn conditional_update_many(
        &self,
        partition: &str,
        ids: &[String],
        expected: AccountStatus,
        new_status: AccountStatus,
    ) -> Result<Vec<String>, EngineError>;

    /// 処理結果を書き戻す（`Processing` のレコードに一致した場合 true）
    async fn update_one(
        &self,
        partition: &str,
        id: &str,
        update: AccountUpdate,
    ) -> Result<bool, EngineError>;

    async fn count_by_status(
        &self,
        partition: &str,
        status: AccountStatus,
    ) -> Result<u64, EngineError>;

    async fn distinct_tags(&self, partition: &str) -> Result<Vec<String>, EngineError>;

    /// 一括取り込み（パーティション内で既存のIDはスキップ）
    async fn insert_many(
        &self,
        partition: &str,
        accounts: Vec<NewAccount>,
    ) -> Result<InsertSummary, EngineError>;

    /// 失敗レコードを `New` に戻し、件数を返す
    async fn reset_failed(&self, partition: &str) -> Result<u64, EngineError>;

    async fn get(&self, partition: &str, id: &str) -> Result<Option<Account>, EngineError>;

    async fn list_partitions(&self) -> Result<Vec<String>, EngineError>;
}

/// 1ワーカーが生存期間中占有する抽出セッション
#[async_trait]
pub trait ExtractSession: Send {
    /// 1アカウント分の明細を取得
    async fn extract(&mut self, account_id: &str) -> Result<BillSummary, ExtractFailure>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// 抽出セッションの生成元
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn ExtractSession>, EngineError>;
}

/// インターネット接続の確認
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}
