//! アカウントレコードと抽出結果の型定義

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 抽出結果に保持できる数値フィールドの最大数
pub const MAX_AMOUNT_FIELDS: usize = 4;

/// アカウントの処理状態
///
/// `New → Processing → {Processed | Failed}` の順にのみ進む。
/// `Failed → New` は `reset_failed` による明示的なリセットのみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    New,
    Processing,
    Processed,
    Failed,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 4] = [
        AccountStatus::New,
        AccountStatus::Processing,
        AccountStatus::Processed,
        AccountStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::New => "new",
            AccountStatus::Processing => "processing",
            AccountStatus::Processed => "processed",
            AccountStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 明細の抽出結果（月別金額と最大値）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillSummary {
    /// フィールド名 → 金額（取得できなかった月は `None`）
    pub amounts: BTreeMap<String, Option<f64>>,
    /// 取得できた金額の最大値
    pub highest: Option<f64>,
}

impl BillSummary {
    /// `MAX_AMOUNT_FIELDS` を超えるフィールドは捨てる
    pub fn from_amounts<I, K>(amounts: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<f64>)>,
        K: Into<String>,
    {
        let amounts: BTreeMap<String, Option<f64>> = amounts
            .into_iter()
            .take(MAX_AMOUNT_FIELDS)
            .map(|(k, v)| (k.into(), v))
            .collect();

        let highest = max_amount(amounts.values().flatten().copied());

        Self { amounts, highest }
    }

    /// 最大値を月フィールド以外の行も含めた値で置き換える
    pub fn with_highest(mut self, highest: Option<f64>) -> Self {
        self.highest = highest;
        self
    }

    pub fn amount(&self, field: &str) -> Option<f64> {
        self.amounts.get(field).copied().flatten()
    }
}

/// 金額の最大値（空なら `None`）
pub fn max_amount(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values
        .into_iter()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// 1件のアカウントレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub partition: String,
    pub status: AccountStatus,
    pub result: Option<BillSummary>,
    pub error: Option<String>,
    pub attempts_failed: u32,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(partition: impl Into<String>, id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
            status: AccountStatus::New,
            result: None,
            error: None,
            attempts_failed: 0,
            tag: tag.into(),
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// 処理結果を反映する（`Processing` のレコードにのみ適用される）
    pub fn apply(&mut self, update: AccountUpdate) -> bool {
        if self.status != AccountStatus::Processing {
            return false;
        }

        match update {
            AccountUpdate::Processed {
                result,
                processed_at,
            } => {
                self.status = AccountStatus::Processed;
                self.result = Some(result);
                self.error = None;
                self.attempts_failed = 0;
                self.processed_at = Some(processed_at);
            }
            AccountUpdate::Failed {
                error,
                attempts_failed,
                processed_at,
            } => {
                self.status = AccountStatus::Failed;
                self.result = None;
                self.error = Some(error);
                self.attempts_failed = attempts_failed;
                self.processed_at = Some(processed_at);
            }
        }
        true
    }

    /// 失敗レコードを再処理対象に戻す
    pub fn reset(&mut self) -> bool {
        if self.status != AccountStatus::Failed {
            return false;
        }
        self.status = AccountStatus::New;
        self.error = None;
        self.attempts_failed = 0;
        true
    }
}

/// 取り込み用のアカウント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub id: String,
    pub tag: String,
}

impl NewAccount {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
        }
    }
}

/// 取り込み結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// ワーカーが書き戻す処理結果
#[derive(Debug, Clone, PartialEq)]
pub enum AccountUpdate {
    Processed {
        result: BillSummary,
        processed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        attempts_failed: u32,
        processed_at: DateTime<Utc>,
    },
}

impl AccountUpdate {
    pub fn processed(result: BillSummary) -> Self {
        AccountUpdate::Processed {
            result,
            processed_at: Utc::now(),
        }
    }

    /// エラー文は `max_chars` 文字で切り詰める
    pub fn failed(error: &str, attempts_failed: u32, max_chars: usize) -> Self {
        AccountUpdate::Failed {
            error: truncate_chars(error, max_chars),
            attempts_failed,
            processed_at: Utc::now(),
        }
    }
}

/// 文字境界を壊さずに切り詰める
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&AccountStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let back: AccountStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, AccountStatus::Failed);
    }

    #[test]
    fn test_summary_highest() {
        let summary = BillSummary::from_amounts([
            ("April25", Some(812.0)),
            ("May25", None),
            ("June25", Some(1204.5)),
        ]);
        assert_eq!(summary.highest, Some(1204.5));
        assert_eq!(summary.amount("April25"), Some(812.0));
        assert_eq!(summary.amount("May25"), None);
    }

    #[test]
    fn test_summary_caps_field_count() {
        let summary = BillSummary::from_amounts(
            (0..6).map(|i| (format!("m{}", i), Some(i as f64))),
        );
        assert_eq!(summary.amounts.len(), MAX_AMOUNT_FIELDS);
        assert_eq!(summary.highest, Some(3.0));
    }

    #[test]
    fn test_summary_without_amounts() {
        let summary = BillSummary::from_amounts([("April25", None::<f64>)]);
        assert_eq!(summary.highest, None);
    }

    #[test]
    fn test_apply_requires_processing() {
        let mut account = Account::new("p", "1001", "t");
        assert!(!account.apply(AccountUpdate::processed(BillSummary::default())));
        assert_eq!(account.status, AccountStatus::New);

        account.status = AccountStatus::Processing;
        assert!(account.apply(AccountUpdate::failed("boom", 2, 500)));
        assert_eq!(account.status, AccountStatus::Failed);
        assert_eq!(account.attempts_failed, 2);
        assert_eq!(account.error.as_deref(), Some("boom"));

        // 終端状態からは動かない
        assert!(!account.apply(AccountUpdate::processed(BillSummary::default())));
        assert_eq!(account.status, AccountStatus::Failed);
    }

    #[test]
    fn test_reset_only_from_failed() {
        let mut account = Account::new("p", "1001", "t");
        assert!(!account.reset());

        account.status = AccountStatus::Processing;
        account.apply(AccountUpdate::failed("boom", 2, 500));
        assert!(account.reset());
        assert_eq!(account.status, AccountStatus::New);
        assert_eq!(account.attempts_failed, 0);
        assert!(account.error.is_none());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("明細データなし", 2), "明細");
    }
}
