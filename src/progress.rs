//! 実行単位の進捗カウンタ
//!
//! アカウントストアとは独立にJSONファイルへ保存し、再起動後もステータス表示に使う。
//! レコード単位の状態の正本はストア側で、こちらは集計表示専用。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_failed: u64,
    /// オフセット方式のクレームでのみ使われていた値。読み込み互換のために残す
    #[serde(default, alias = "last_processed")]
    pub last_batch_cursor: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 1バッチ分の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub processed: u64,
    pub failed: u64,
}

impl BatchTally {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

pub struct ProgressTracker {
    path: PathBuf,
    state: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    /// ファイルから読み込む。無い・空・壊れている場合はゼロから始める
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = load_snapshot(&path).await;
        Self {
            path,
            state: Mutex::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().await.clone()
    }

    /// 新しい実行のためにカウンタをゼロに戻して保存
    pub async fn reset(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        *state = ProgressSnapshot {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        persist(&self.path, &state).await
    }

    /// バッチの集計を加算して保存
    ///
    /// 加算はロック内で行うので複数ワーカーから呼んでも取りこぼさない。
    /// 保存に失敗してもメモリ上のカウンタは進んだまま。
    pub async fn record_batch(&self, tally: BatchTally) -> Result<ProgressSnapshot, EngineError> {
        let mut state = self.state.lock().await;
        state.total_processed += tally.processed;
        state.total_failed += tally.failed;
        state.updated_at = Some(Utc::now());
        let snapshot = state.clone();
        persist(&self.path, &state).await?;
        Ok(snapshot)
    }
}

async fn load_snapshot(path: &Path) -> ProgressSnapshot {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No progress file at {:?}, starting empty", path);
            return ProgressSnapshot::default();
        }
        Err(e) => {
            warn!("Couldn't read progress file {:?}: {}", path, e);
            return ProgressSnapshot::default();
        }
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return ProgressSnapshot::default();
    }

    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Couldn't parse progress file {:?}: {}", path, e);
            ProgressSnapshot::default()
        }
    }
}

/// 一時ファイルに書いてからリネームする
async fn persist(path: &Path, snapshot: &ProgressSnapshot) -> Result<(), EngineError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
