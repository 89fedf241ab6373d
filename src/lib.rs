//! 電気料金明細スクレイパーのジョブ処理エンジン
//!
//! - アカウントストアの `new` レコードを複数ワーカーで排他的にクレーム
//! - 抽出器（ブラウザ）で1件ずつ明細を取得し、リトライ付きで結果を書き戻す
//! - 一時停止・再開・停止はアカウントの合間で協調的に反映
//! - 実行単位の進捗はJSONファイルに保存
//!
//! # 使用例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bill_scraper::{
//!     BillHistoryExtractor, BillSiteConfig, EngineConfig, HttpConnectivity,
//!     InMemoryAccountStore, PoolController,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig::from_env();
//!     let connectivity = Arc::new(HttpConnectivity::new(config.check_url.clone()).unwrap());
//!     let extractor = Arc::new(BillHistoryExtractor::new(
//!         BillSiteConfig::default(),
//!         connectivity.clone(),
//!     ));
//!     let store = Arc::new(InMemoryAccountStore::new());
//!
//!     let pool = PoolController::new(config, store, extractor, connectivity).await;
//!     pool.start("default_collection", 3).await.unwrap();
//!     pool.wait_finished().await;
//!     println!("{:?}", pool.status(None).await.unwrap());
//! }
//! ```

pub mod account;
pub mod bill;
pub mod claim;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod error;
pub mod pool;
pub mod progress;
pub mod service;
pub mod store;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// 主要な型をリエクスポート
pub use account::{
    Account, AccountStatus, AccountUpdate, BillSummary, InsertSummary, NewAccount,
};
pub use claim::{ClaimEngine, ClaimOutcome};
pub use config::EngineConfig;
pub use connectivity::HttpConnectivity;
pub use control::{RunControl, RunState};
pub use error::{EngineError, ExtractFailure};
pub use pool::{PoolController, PoolStatus, StatusCounts};
pub use progress::{BatchTally, ProgressSnapshot, ProgressTracker};
pub use service::{ControlRequest, ControlResponse, ControlService};
pub use store::InMemoryAccountStore;
pub use traits::{AccountStore, Connectivity, ExtractSession, Extractor};
pub use worker::{WorkerExit, WorkerReport};

// 明細スクレイパー関連の型もリエクスポート
pub use bill::{BillHistoryExtractor, BillSiteConfig, MonthField};
