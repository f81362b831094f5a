// src/error.rs

use thiserror::Error;

/// 服务端出错时返回体中携带的标记
pub const SERVER_ERROR_SENTINEL: &str = "There was an error";

/// 网络拉取错误（manifest 与图片共用）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server side system error")]
    ServerError,
    #[error("empty response body")]
    EmptyBody,
    #[error("request timed out after {0} ms")]
    Timeout(u64),
}

/// manifest 解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty or error response")]
    EmptyResponse,
    #[error("malformed slot id '{0}'")]
    MalformedSlotId(String),
    #[error("malformed json: {0}")]
    MalformedJson(String),
}

/// 本地图片缓存错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cached file '{0}' is missing")]
    MissingLocalFile(String),
    #[error("failed to write cache file '{file}': {reason}")]
    WriteFailure { file: String, reason: String },
    #[error("failed to read cache file '{file}': {reason}")]
    ReadFailure { file: String, reason: String },
}

/// 会话数据解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("corrupt session blob: {0}")]
    CorruptBlob(String),
    #[error("unsupported session version {0}")]
    UnsupportedVersion(u32),
}

/// 汇总错误，后台任务里的所有错误都会转换成它再上报
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IasError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown advert {0}")]
    UnknownAd(String),
    #[error("unknown manifest file {0}")]
    UnknownFile(usize),
    #[error("persist failure: {0}")]
    Persist(String),
}

impl IasError {
    /// 错误类别，用于事件日志
    pub fn kind(&self) -> &'static str {
        match self {
            IasError::Fetch(_) => "fetch",
            IasError::Parse(_) => "parse",
            IasError::Cache(_) => "cache",
            IasError::Decode(_) => "decode",
            IasError::UnknownAd(_) => "unknown_ad",
            IasError::UnknownFile(_) => "unknown_file",
            IasError::Persist(_) => "persist",
        }
    }
}
