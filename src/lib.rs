//! In-app advert slot rotation and image cache.
//!
//! 远程 manifest 描述所有广告位；`IasManager` 负责拉取、合并、轮播、
//! 下载并缓存广告图片，以及跨会话保存状态。

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod manifest;
pub mod mock_feed;
pub mod model;
pub mod rotation;
pub mod session;

pub use config::IasConfig;
pub use coordinator::{IasEvent, IasManager};
pub use error::IasError;
