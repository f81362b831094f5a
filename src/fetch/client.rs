// src/fetch/client.rs

use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::{FetchError, SERVER_ERROR_SENTINEL};

/// 外部 HTTP 拉取接口，manifest 和图片都走这里
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// 基于 reqwest 的实现，每个请求都有超时
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let start = Instant::now();
        let result = match timeout(self.timeout, self.get(url)).await {
            Ok(Ok(body)) => check_body(body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FetchError::Timeout(self.timeout.as_millis() as u64)),
        };
        debug!(
            url,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "fetch finished"
        );
        result
    }
}

/// 按顺序检查服务端错误标记和空响应
pub fn check_body(body: Vec<u8>) -> Result<Vec<u8>, FetchError> {
    let sentinel = SERVER_ERROR_SENTINEL.as_bytes();
    if body.windows(sentinel.len()).any(|w| w == sentinel) {
        return Err(FetchError::ServerError);
    }
    if body.is_empty() {
        return Err(FetchError::EmptyBody);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bodies() {
        assert_eq!(check_body(Vec::new()), Err(FetchError::EmptyBody));
        assert_eq!(
            check_body(b"oops: There was an error!".to_vec()),
            Err(FetchError::ServerError)
        );
        assert_eq!(check_body(vec![1, 2, 3]), Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500));
        let result = fetcher.fetch_bytes("http://127.0.0.1:1/manifest.json").await;
        assert!(matches!(
            result,
            Err(FetchError::Network(_)) | Err(FetchError::Timeout(_))
        ));
    }
}
