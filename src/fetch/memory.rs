// src/fetch/memory.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::FetchError;
use crate::fetch::client::{check_body, Fetcher};

/// 内存中的 Fetcher，按 URL 返回预设结果，并统计请求次数
#[derive(Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
    calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: &str, body: impl Into<Vec<u8>>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), Ok(body.into()));
        }
    }

    pub fn set_error(&self, url: &str, error: FetchError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), Err(error));
        }
    }

    /// 目前为止的请求次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .map_err(|e| FetchError::Network(e.to_string()))?
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("HTTP 404 Not Found: {}", url))));
        response.and_then(check_body)
    }
}
