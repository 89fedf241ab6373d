use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("既に処理が実行中です: partition={0}")]
    AlreadyRunning(String),

    #[error("実行中の処理がありません")]
    NotRunning,

    #[error("一時停止されていません")]
    NotPaused,

    #[error("ストアに接続できません: {0}")]
    StoreUnavailable(String),

    #[error("セッションエラー: {0}")]
    Session(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTPクライアントエラー: {0}")]
    Http(#[from] reqwest::Error),
}

/// 1アカウント分の抽出失敗の分類
///
/// `NetworkUnavailable` だけは接続待ちに回り、リトライ回数を消費しない。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractFailure {
    #[error("ネットワーク接続なし: {0}")]
    NetworkUnavailable(String),

    #[error("認証問題の検証に失敗: {0}")]
    ChallengeFailed(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("明細データなし: {0}")]
    NoData(String),

    #[error("不明なエラー: {0}")]
    Unknown(String),
}

impl ExtractFailure {
    /// リトライ予算を消費する失敗か
    pub fn counts_against_budget(&self) -> bool {
        !matches!(self, ExtractFailure::NetworkUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_failure_is_free() {
        assert!(!ExtractFailure::NetworkUnavailable("offline".into()).counts_against_budget());
        assert!(ExtractFailure::ChallengeFailed("bad answer".into()).counts_against_budget());
        assert!(ExtractFailure::NoData("empty".into()).counts_against_budget());
    }

    #[test]
    fn test_display_keeps_reason() {
        let e = ExtractFailure::ElementNotFound("#historyDivbtn".into());
        assert!(e.to_string().contains("#historyDivbtn"));
    }
}
