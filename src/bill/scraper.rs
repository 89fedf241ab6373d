//! 明細照会ポータルのブラウザ抽出器
//!
//! ワーカーごとに1つの Chrome を起動し、同じページを使い回してアカウントを順に照会する。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::account::BillSummary;
use crate::error::{EngineError, ExtractFailure};
use crate::traits::{Connectivity, ExtractSession, Extractor};

use super::parse::{summarize, BillRow};
use super::types::BillSiteConfig;

/// 要素出現確認のインターバル（ミリ秒）
const ELEMENT_POLL_MS: u64 = 500;

/// 履歴ボタンまでのスクロール量
const HISTORY_SCROLL_PX: u32 = 280;

/// 履歴テーブルの行を [請求月, 金額] の配列で返す（ヘッダー行とセル不足の行は除く）
const READ_ROWS_SCRIPT: &str = r#"
    (function() {
        var table = document.getElementById('consumptionData');
        if (!table) return null;
        var rows = table.querySelectorAll('tr');
        var out = [];
        for (var i = 1; i < rows.length; i++) {
            var cells = rows[i].querySelectorAll('td');
            if (cells.length < 4) continue;
            var input = cells[3].querySelector('input');
            var amount = input ? (input.value || '') : cells[3].innerText;
            out.push([cells[1].innerText.trim(), amount.trim()]);
        }
        return out;
    })()
"#;

/// alert を横取りしてメッセージを保持する
const CAPTURE_ALERT_SCRIPT: &str = r#"
    (function() {
        window.__billAlert = null;
        window.alert = function(message) { window.__billAlert = String(message); };
        return true;
    })()
"#;

/// 明細照会の抽出器
pub struct BillHistoryExtractor {
    config: BillSiteConfig,
    connectivity: Arc<dyn Connectivity>,
}

impl BillHistoryExtractor {
    pub fn new(config: BillSiteConfig, connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            config,
            connectivity,
        }
    }
}

#[async_trait]
impl Extractor for BillHistoryExtractor {
    async fn new_session(&self) -> Result<Box<dyn ExtractSession>, EngineError> {
        let session = BillHistorySession::launch(self.config.clone(), self.connectivity.clone()).await?;
        Ok(Box::new(session))
    }
}

/// ブラウザ1つ分のセッション
pub struct BillHistorySession {
    config: BillSiteConfig,
    connectivity: Arc<dyn Connectivity>,
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    user_data_dir: PathBuf,
}

impl BillHistorySession {
    /// ブラウザを起動してページを1枚開く
    pub async fn launch(
        config: BillSiteConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, EngineError> {
        info!("ブラウザを初期化中...");

        // ユニークなユーザーデータディレクトリを生成
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("bill-scraper-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .chrome_executable(config.chrome_executable())
            .user_data_dir(&user_data_dir)
            .window_size(1280, 720);

        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| EngineError::Session(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;

        info!("ブラウザ初期化完了");
        Ok(Self {
            config,
            connectivity,
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
            user_data_dir,
        })
    }

    fn page(&self) -> Result<Page, ExtractFailure> {
        self.page
            .clone()
            .ok_or_else(|| ExtractFailure::Unknown("ブラウザが初期化されていません".into()))
    }

    /// 照会ページを開く。失敗時は接続確認で通信断かどうかを判定する
    async fn open_portal(&self, page: &Page) -> Result<(), ExtractFailure> {
        if let Err(e) = page.goto(self.config.url.as_str()).await {
            return Err(self.classify_navigation_error(e.to_string()).await);
        }
        sleep(self.config.settle_delay).await;
        Ok(())
    }

    async fn classify_navigation_error(&self, message: String) -> ExtractFailure {
        if self.connectivity.is_online().await {
            ExtractFailure::Unknown(format!("ナビゲーションエラー: {}", message))
        } else {
            ExtractFailure::NetworkUnavailable(message)
        }
    }

    /// セレクタが現れるまで待機
    async fn wait_for_element(&self, page: &Page, element_id: &str) -> Result<(), ExtractFailure> {
        let script = format!("document.getElementById('{}') !== null", element_id);
        let start = std::time::Instant::now();

        while start.elapsed() < self.config.element_timeout {
            match page.evaluate(script.as_str()).await {
                Ok(v) => {
                    if v.into_value::<bool>().unwrap_or(false) {
                        return Ok(());
                    }
                }
                Err(e) => debug!("Element check error for #{}: {}", element_id, e),
            }
            sleep(Duration::from_millis(ELEMENT_POLL_MS)).await;
        }

        Err(ExtractFailure::ElementNotFound(format!(
            "#{} ({:?}以内に出現せず)",
            element_id, self.config.element_timeout
        )))
    }

    /// 顧客番号と認証問題の答えを入力して送信
    async fn submit_account(&self, page: &Page, account_id: &str) -> Result<(), ExtractFailure> {
        self.wait_for_element(page, "ltscno").await?;
        page.find_element("#ltscno")
            .await
            .map_err(|e| ExtractFailure::ElementNotFound(format!("顧客番号入力欄: {}", e)))?
            .type_str(account_id)
            .await
            .map_err(|e| ExtractFailure::Unknown(format!("顧客番号入力: {}", e)))?;
        debug!("顧客番号入力完了: {}", account_id);

        // 認証問題はページ上のテキストがそのまま答えになっている
        self.wait_for_element(page, "Billquestion").await?;
        let answer: String = page
            .evaluate("document.getElementById('Billquestion').innerText.trim()")
            .await
            .map_err(|e| ExtractFailure::ChallengeFailed(format!("認証問題の取得: {}", e)))?
            .into_value()
            .map_err(|e| ExtractFailure::ChallengeFailed(format!("認証問題の取得: {}", e)))?;

        page.find_element("#Billans")
            .await
            .map_err(|e| ExtractFailure::ElementNotFound(format!("認証回答欄: {}", e)))?
            .type_str(&answer)
            .await
            .map_err(|e| ExtractFailure::Unknown(format!("認証回答入力: {}", e)))?;

        if let Err(e) = page.evaluate(CAPTURE_ALERT_SCRIPT).await {
            debug!("Failed to install alert hook: {}", e);
        }

        page.find_element("#Billsignin")
            .await
            .map_err(|e| ExtractFailure::ElementNotFound(format!("送信ボタン: {}", e)))?
            .click()
            .await
            .map_err(|e| ExtractFailure::Unknown(format!("送信ボタンクリック: {}", e)))?;

        sleep(self.config.settle_delay).await;

        // 画面遷移した場合は __billAlert が存在しないので None になる
        let alert: Option<String> = page
            .evaluate("window.__billAlert || null")
            .await
            .ok()
            .and_then(|v| v.into_value().ok())
            .flatten();
        if let Some(text) = alert {
            return Err(ExtractFailure::ChallengeFailed(text));
        }

        Ok(())
    }

    /// 履歴ボタンを押してテーブルを表示
    async fn open_history(&self, page: &Page) -> Result<(), ExtractFailure> {
        self.wait_for_element(page, "historyDivbtn")
            .await
            .map_err(|_| {
                ExtractFailure::ElementNotFound("認証失敗、または履歴ボタンなし".into())
            })?;

        let scroll = format!("window.scrollBy(0, {})", HISTORY_SCROLL_PX);
        if let Err(e) = page.evaluate(scroll.as_str()).await {
            debug!("Scroll failed: {}", e);
        }
        sleep(self.config.settle_delay).await;

        page.find_element("#historyDivbtn")
            .await
            .map_err(|e| ExtractFailure::ElementNotFound(format!("履歴ボタン: {}", e)))?
            .click()
            .await
            .map_err(|e| ExtractFailure::Unknown(format!("履歴ボタンクリック: {}", e)))?;

        self.wait_for_element(page, "consumptionData").await
    }

    async fn read_rows(&self, page: &Page) -> Result<Vec<BillRow>, ExtractFailure> {
        let raw: Option<Vec<Vec<String>>> = page
            .evaluate(READ_ROWS_SCRIPT)
            .await
            .map_err(|e| ExtractFailure::Unknown(format!("履歴テーブル読み取り: {}", e)))?
            .into_value()
            .map_err(|e| ExtractFailure::Unknown(format!("履歴テーブル解析: {}", e)))?;

        let raw = raw.ok_or_else(|| ExtractFailure::ElementNotFound("#consumptionData".into()))?;
        Ok(raw
            .into_iter()
            .filter_map(|cells| {
                let mut cells = cells.into_iter();
                Some(BillRow {
                    month: cells.next()?,
                    amount: cells.next()?,
                })
            })
            .collect())
    }

    /// 照会 → 送信 → 履歴表示 → 読み取り
    async fn run_steps(&self, page: &Page, account_id: &str) -> Result<BillSummary, ExtractFailure> {
        self.open_portal(page).await?;
        self.submit_account(page, account_id).await?;
        self.open_history(page).await?;
        let rows = self.read_rows(page).await?;
        summarize(&rows, &self.config.months)
    }

    /// デバッグスクリーンショット
    async fn log_screenshot(&self, page: &Page, account_id: &str) {
        if let Ok(screenshot) = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
            debug!("Failure screenshot for {}: data:image/png;base64,{}", account_id, encoded);
        }
    }
}

#[async_trait]
impl ExtractSession for BillHistorySession {
    async fn extract(&mut self, account_id: &str) -> Result<BillSummary, ExtractFailure> {
        let page = self.page()?;
        info!("明細照会開始: {}", account_id);

        let result = self.run_steps(&page, account_id).await;

        if result.is_err() && self.config.debug {
            self.log_screenshot(&page, account_id).await;
        }
        result
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        info!("ブラウザを終了中...");

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }

        let mut result = Ok(());
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                result = Err(EngineError::Session(format!("ブラウザ終了エラー: {}", e)));
            }
            if let Err(e) = browser.wait().await {
                debug!("Failed to wait for browser exit: {}", e);
            }
        }

        if let Some(task) = self.handler_task.take() {
            task.abort();
        }

        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            warn!("ユーザーデータディレクトリ削除失敗 {:?}: {}", self.user_data_dir, e);
        }

        info!("ブラウザ終了完了");
        result
    }
}
