use std::sync::Arc;

use bill_scraper::{
    BillHistoryExtractor, BillSiteConfig, ExtractSession, Extractor, HttpConnectivity,
};

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 環境変数から顧客番号を取得
    let account_id = std::env::var("BILL_ACCOUNT_ID")
        .expect("BILL_ACCOUNT_ID environment variable not set");

    let config = BillSiteConfig::default()
        .with_headless(false) // デバッグ用に表示モード
        .with_debug(true);
    let connectivity = Arc::new(
        HttpConnectivity::new("http://www.google.com").expect("Failed to build HTTP client"),
    );
    let extractor = BillHistoryExtractor::new(config, connectivity);

    println!("=== Bill History Extract Test ===");

    let mut session = extractor
        .new_session()
        .await
        .expect("Failed to launch browser");

    match session.extract(&account_id).await {
        Ok(summary) => {
            println!("成功! {:?}", summary.amounts);
            println!("最大値: {:?}", summary.highest);
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
        }
    }

    if let Err(e) = session.close().await {
        eprintln!("ブラウザ終了エラー: {}", e);
    }
}
