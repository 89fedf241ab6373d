//! 履歴テーブルの行から明細結果を組み立てる

use crate::account::{max_amount, BillSummary};
use crate::error::ExtractFailure;

use super::types::MonthField;

/// ページから読み取った1行（請求月セル, 金額セル）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRow {
    pub month: String,
    pub amount: String,
}

/// 金額文字列から数字と小数点以外を除いて数値化
pub fn clean_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// 行を設定された月フィールドに割り当てる
///
/// 同じ月に一致する行が複数あれば後の行が優先される。
/// `highest` は月フィールドに限らず、金額を読めた全行の最大値。
pub fn summarize(rows: &[BillRow], months: &[MonthField]) -> Result<BillSummary, ExtractFailure> {
    if rows.is_empty() {
        return Err(ExtractFailure::NoData("No data rows found".into()));
    }

    let mut values: Vec<Option<f64>> = vec![None; months.len()];
    let mut all = Vec::with_capacity(rows.len());
    for row in rows {
        let amount = clean_amount(&row.amount);
        if let Some(idx) = months.iter().position(|m| m.matches(&row.month)) {
            values[idx] = amount;
        }
        all.extend(amount);
    }

    Ok(
        BillSummary::from_amounts(months.iter().map(|m| m.name.clone()).zip(values))
            .with_highest(max_amount(all)),
    )
}
