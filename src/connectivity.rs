use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::EngineError;
use crate::traits::Connectivity;

const CHECK_TIMEOUT_SECS: u64 = 5;

/// 指定URLへのGETが返ればオンラインとみなす
#[derive(Debug, Clone)]
pub struct HttpConnectivity {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectivity {
    pub fn new(url: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHECK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connectivity check against {} failed: {}", self.url, e);
                false
            }
        }
    }
}
