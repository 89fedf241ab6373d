//! 電気料金明細（請求履歴）スクレイパー
//!
//! 顧客番号ごとに照会ページを操作し、直近の月別請求額を取得する。

mod parse;
mod scraper;
mod types;

pub use parse::{clean_amount, summarize, BillRow};
pub use scraper::{BillHistoryExtractor, BillHistorySession};
pub use types::{BillSiteConfig, MonthField};
