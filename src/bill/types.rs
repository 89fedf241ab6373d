//! 明細スクレイパーの設定型

use std::time::Duration;

/// 抽出結果の1フィールドと、それに対応する請求月ラベルのパターン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthField {
    /// 保存時のフィールド名（例: "April25"）
    pub name: String,
    /// 請求月セル（大文字化後）に含まれていれば一致とみなす文字列
    pub patterns: Vec<String>,
}

impl MonthField {
    pub fn new(name: impl Into<String>, patterns: &[&str]) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| p.to_uppercase()).collect(),
        }
    }

    pub fn matches(&self, bill_month: &str) -> bool {
        let upper = bill_month.to_uppercase();
        self.patterns.iter().any(|p| upper.contains(p.as_str()))
    }
}

/// 明細スクレイパー設定
#[derive(Debug, Clone)]
pub struct BillSiteConfig {
    /// 明細照会ページ
    pub url: String,
    /// ヘッドレスモード
    pub headless: bool,
    /// デバッグモード（失敗時にスクリーンショットをログ出力）
    pub debug: bool,
    /// Chrome 実行ファイル（未指定なら CHROME_PATH / CHROMIUM_PATH / "chromium"）
    pub chrome_path: Option<String>,
    /// 要素出現待ちのタイムアウト
    pub element_timeout: Duration,
    /// ページ操作後の待機
    pub settle_delay: Duration,
    /// 取得対象の月
    pub months: Vec<MonthField>,
}

impl Default for BillSiteConfig {
    fn default() -> Self {
        Self {
            url: "https://www.apeasternpower.com/viewBillDetailsMain".to_string(),
            headless: true,
            debug: false,
            chrome_path: None,
            element_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            months: vec![
                MonthField::new("April25", &["APR"]),
                MonthField::new("May25", &["MAY"]),
                MonthField::new("June25", &["JUN"]),
            ],
        }
    }
}

impl BillSiteConfig {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_months(mut self, months: Vec<MonthField>) -> Self {
        self.months = months;
        self
    }

    pub fn chrome_executable(&self) -> String {
        self.chrome_path
            .clone()
            .or_else(|| std::env::var("CHROME_PATH").ok())
            .or_else(|| std::env::var("CHROMIUM_PATH").ok())
            .unwrap_or_else(|| "chromium".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_field_matching() {
        let field = MonthField::new("June25", &["jun"]);
        assert!(field.matches("Jun-2025"));
        assert!(field.matches("JUNE 25"));
        assert!(!field.matches("JUL-2025"));
    }

    #[test]
    fn test_default_months() {
        let config = BillSiteConfig::default();
        let names: Vec<&str> = config.months.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["April25", "May25", "June25"]);
        assert!(config.headless);
    }

    #[test]
    fn test_explicit_chrome_path_wins() {
        let config = BillSiteConfig {
            chrome_path: Some("/opt/chrome".into()),
            ..Default::default()
        };
        assert_eq!(config.chrome_executable(), "/opt/chrome");
    }
}
