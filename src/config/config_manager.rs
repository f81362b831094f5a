use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::parser::Platform;
use crate::model::policy::{InstalledAppPolicy, InstalledApps, PreloadPolicy};

/// 广告服务配置
#[derive(Clone, Debug)]
pub struct IasConfig {
    pub manifest_urls: Vec<String>,        // 远程 JSON 地址，下标即文件 ID
    pub bundle_id: String,                 // 当前应用包名，用于识别自身广告
    pub platform: Platform,                // 决定包名提取方式
    pub cache_dir: PathBuf,                // 图片缓存目录
    pub state_dir: PathBuf,                // 会话数据目录
    pub use_storage_cache: bool,           // 是否把图片缓存到本地
    pub preload: PreloadPolicy,
    pub installed_policy: InstalledAppPolicy,
    pub installed_apps: InstalledApps,
    pub fetch_timeout: Duration,
    pub save_debounce: Duration,
    pub refresh_interval: Duration,        // tick 触发重新拉取 manifest 的间隔
}

impl Default for IasConfig {
    fn default() -> Self {
        Self {
            manifest_urls: Vec::new(),
            bundle_id: "com.example.GameNameHere".to_string(),
            platform: Platform::current(),
            cache_dir: PathBuf::from("ias_cache"),
            state_dir: PathBuf::from("ias_state"),
            use_storage_cache: true,
            preload: PreloadPolicy::default(),
            installed_policy: InstalledAppPolicy::default(),
            installed_apps: InstalledApps::default(),
            fetch_timeout: Duration::from_secs(10),
            save_debounce: Duration::from_millis(500),
            refresh_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl IasConfig {
    pub fn new(manifest_urls: Vec<String>) -> Self {
        Self {
            manifest_urls,
            ..Self::default()
        }
    }

    /// 逗号分隔的 manifest 地址
    pub fn from_args(manifest_urls: &str) -> Self {
        let urls = manifest_urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(String::from)
            .collect();
        IasConfig::new(urls)
    }

    pub fn file_count(&self) -> usize {
        self.manifest_urls.len()
    }

    /// 是否还是示例包名（发布前必须修改）
    pub fn has_placeholder_bundle_id(&self) -> bool {
        self.bundle_id == "com.example.GameNameHere"
    }
}
