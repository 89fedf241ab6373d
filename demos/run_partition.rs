use std::sync::Arc;
use std::time::Duration;

use bill_scraper::{
    AccountStore, BillHistoryExtractor, BillSiteConfig, EngineConfig, HttpConnectivity,
    InMemoryAccountStore, NewAccount, PoolController,
};

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_env_filter("info,bill_scraper=debug")
        .init();

    // 環境変数から顧客番号一覧を取得（JSON形式）
    // 例: BILL_ACCOUNTS='["1234567890123","2234567890123"]'
    let accounts_json = std::env::var("BILL_ACCOUNTS")
        .expect("BILL_ACCOUNTS environment variable not set");
    let ids: Vec<String> = serde_json::from_str(&accounts_json)
        .expect("Failed to parse BILL_ACCOUNTS JSON");
    let workers: usize = std::env::var("BILL_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let config = EngineConfig::from_env();
    let partition = config.default_partition.clone();

    let store = Arc::new(InMemoryAccountStore::new());
    let inserted = store
        .insert_many(
            &partition,
            ids.into_iter().map(|id| NewAccount::new(id, "demo")).collect(),
        )
        .await
        .expect("Failed to insert accounts");
    println!("=== {} accounts queued ({} skipped) ===", inserted.inserted, inserted.skipped);

    let connectivity = Arc::new(
        HttpConnectivity::new(config.check_url.clone()).expect("Failed to build HTTP client"),
    );
    let extractor = Arc::new(BillHistoryExtractor::new(
        BillSiteConfig::default(),
        connectivity.clone(),
    ));
    let pool = Arc::new(PoolController::new(config, store.clone(), extractor, connectivity).await);

    let started = pool.start(&partition, workers).await.expect("Failed to start");
    println!("Started {} workers", started);

    // Ctrl+C で停止要求
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n停止要求を送信します...");
                let _ = pool.stop();
            }
        });
    }

    // 進捗を定期表示
    let reporter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                match pool.status(None).await {
                    Ok(s) => println!(
                        "[status] new={} processing={} processed={} failed={} workers={}",
                        s.counts.new, s.counts.processing, s.counts.processed, s.counts.failed, s.active_workers
                    ),
                    Err(e) => eprintln!("status error: {}", e),
                }
            }
        })
    };

    for report in pool.wait_finished().await {
        println!(
            "Worker {}: {:?} ({} processed, {} failed)",
            report.worker_id, report.exit, report.processed, report.failed
        );
    }
    reporter.abort();

    for account in store.snapshot(&partition).expect("Failed to read store") {
        println!(
            "{} {} highest={:?} error={:?}",
            account.id,
            account.status,
            account.result.as_ref().and_then(|r| r.highest),
            account.error
        );
    }

    println!("=== 完了 ===");
}
