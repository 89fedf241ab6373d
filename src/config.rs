use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// ワーカー数の上限（CPU数に関わらずこれを超えない）
const WORKER_CEILING: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 1アカウントあたりの最大試行回数
    pub max_retries: u32,
    /// 試行間の待機時間（固定、バックオフなし）
    pub retry_delay: Duration,
    /// 1回のクレームで取得する最大件数
    pub batch_size: usize,
    pub max_workers: usize,
    /// 接続待ち中のポーリング間隔
    pub connectivity_poll: Duration,
    /// バッチ間の待機時間
    pub batch_pause: Duration,
    /// ストア障害時の待機時間
    pub store_backoff: Duration,
    /// 保存するエラーメッセージの最大文字数
    pub error_max_chars: usize,
    pub status_file: PathBuf,
    pub default_partition: String,
    pub check_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(10),
            batch_size: 10,
            max_workers: default_max_workers(),
            connectivity_poll: Duration::from_secs(5),
            batch_pause: Duration::from_secs(2),
            store_backoff: Duration::from_secs(5),
            error_max_chars: 500,
            status_file: PathBuf::from("./data/status.json"),
            default_partition: "default_collection".to_string(),
            check_url: "http://www.google.com".to_string(),
        }
    }
}

/// CPU数-1 を 1..=4 に収める
fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, WORKER_CEILING)
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数 `SCRAPER_*` でデフォルト値を上書きする
    ///
    /// 解釈できない値は警告を出してデフォルトのまま使う。
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("SCRAPER_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("SCRAPER_RETRY_DELAY_SECS") {
            config.retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("SCRAPER_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse::<usize>("SCRAPER_MAX_WORKERS") {
            config.max_workers = v;
        }
        if let Ok(v) = std::env::var("SCRAPER_STATUS_FILE") {
            config.status_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SCRAPER_CHECK_URL") {
            config.check_url = v;
        }

        config
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_connectivity_poll(mut self, interval: Duration) -> Self {
        self.connectivity_poll = interval;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_store_backoff(mut self, backoff: Duration) -> Self {
        self.store_backoff = backoff;
        self
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = path.into();
        self
    }

    pub fn with_default_partition(mut self, partition: impl Into<String>) -> Self {
        self.default_partition = partition.into();
        self
    }

    /// 要求されたワーカー数を `[1, max_workers]` に丸める
    pub fn clamp_workers(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_workers.max(1))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}
