// src/cache/image_cache.rs

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::storage::{ImageStorage, ImageStore};
use crate::error::{CacheError, IasError};
use crate::fetch::client::Fetcher;
use crate::model::catalog::{AdCatalog, AdKey, SlotKey};
use crate::model::policy::InstalledAppPolicy;
use crate::rotation::engine::select_ad;

/// `ensure_cached` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// 图片已在内存中可用
    Ready,
    /// 已有下载在进行
    Pending,
    /// 图片已在内存中可用，但没能写入本地缓存
    ReadyNotStored(IasError),
    /// 自身广告或未启用广告，不下载
    Ineligible,
    Failed(IasError),
}

impl CacheStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheStatus::Ready | CacheStatus::ReadyNotStored(_))
    }
}

/// 一次下载/加载任务的快照，在锁外执行
struct CacheJob {
    file_name: String,
    img_url: String,
    target_update: i64,
    use_local: bool,
}

struct Loaded {
    bytes: Vec<u8>,
    on_disk: bool,
    write_error: Option<CacheError>,
}

/// 广告图片缓存：按需下载、写盘，并把内存句柄记到广告上
pub struct ImageCache {
    storage: ImageStorage,
    images: ImageStore,
    fetcher: Arc<dyn Fetcher>,
    use_storage_cache: bool,
}

impl ImageCache {
    pub fn new(storage: ImageStorage, fetcher: Arc<dyn Fetcher>, use_storage_cache: bool) -> Self {
        Self {
            storage,
            images: ImageStore::new(),
            fetcher,
            use_storage_cache,
        }
    }

    pub fn storage(&self) -> &ImageStorage {
        &self.storage
    }

    pub async fn image(&self, texture_id: usize) -> Option<Arc<Vec<u8>>> {
        self.images.get(texture_id).await
    }

    pub async fn image_count(&self) -> usize {
        self.images.len().await
    }

    /// 释放已从目录中移除的广告图片
    pub async fn release(&self, texture_ids: &[usize]) {
        if !texture_ids.is_empty() {
            debug!(count = texture_ids.len(), "releasing advert images");
            self.images.release(texture_ids).await;
        }
    }

    /// 确保广告图片可用。
    ///
    /// 内存中已有且不过期直接返回 `Ready`；本地缓存新鲜时从磁盘读取，
    /// 否则走网络下载。缓存文件丢失时清除缓存标记并返回失败，下一次调用会重新下载。
    pub async fn ensure_cached(&self, catalog: &RwLock<AdCatalog>, key: AdKey) -> CacheStatus {
        let job = {
            let mut guard = catalog.write().await;
            let Some(ad) = guard.find_ad_mut(&key) else {
                return CacheStatus::Failed(IasError::UnknownAd(key.to_string()));
            };
            if !ad.is_displayable() {
                return CacheStatus::Ineligible;
            }
            if ad.is_downloading {
                return CacheStatus::Pending;
            }
            if ad.is_texture_ready && !ad.is_stale() {
                return CacheStatus::Ready;
            }
            ad.is_downloading = true;
            CacheJob {
                file_name: ad.file_name.clone(),
                img_url: ad.img_url.clone(),
                target_update: ad.latest_known_update,
                use_local: self.use_storage_cache
                    && ad.is_texture_file_cached
                    && ad.cached_update_time >= ad.latest_known_update,
            }
        };

        let outcome = if job.use_local {
            self.load_local(&job).await
        } else {
            self.download(&job).await
        };

        let mut guard = catalog.write().await;
        let Some(ad) = guard.find_ad_mut(&key) else {
            return CacheStatus::Failed(IasError::UnknownAd(key.to_string()));
        };
        ad.is_downloading = false;

        match outcome {
            Ok(loaded) => {
                let texture_id = self.images.insert(ad.texture_id, loaded.bytes).await;
                ad.texture_id = Some(texture_id);
                ad.last_cache_refresh = job.target_update;
                ad.is_texture_ready = true;
                if loaded.on_disk {
                    ad.is_texture_file_cached = true;
                    ad.cached_update_time = job.target_update;
                }
                debug!(ad = %key, texture_id, from_disk = job.use_local, "advert image ready");
                match loaded.write_error {
                    Some(error) => CacheStatus::ReadyNotStored(error.into()),
                    None => CacheStatus::Ready,
                }
            }
            Err(error @ IasError::Cache(_)) => {
                warn!(ad = %key, file = %job.file_name, %error, "cached image unusable, will re-download");
                ad.is_texture_file_cached = false;
                ad.cached_update_time = 0;
                CacheStatus::Failed(error)
            }
            Err(error) => {
                warn!(ad = %key, url = %job.img_url, %error, "advert image download failed");
                CacheStatus::Failed(error)
            }
        }
    }

    async fn load_local(&self, job: &CacheJob) -> Result<Loaded, IasError> {
        let bytes = self.storage.read(&job.file_name).await?;
        Ok(Loaded { bytes, on_disk: true, write_error: None })
    }

    async fn download(&self, job: &CacheJob) -> Result<Loaded, IasError> {
        let bytes = self.fetcher.fetch_bytes(&job.img_url).await?;
        if !self.use_storage_cache {
            return Ok(Loaded { bytes, on_disk: false, write_error: None });
        }
        // 写盘失败不影响本次展示，错误交给调用方上报
        match self.storage.write(&job.file_name, &bytes).await {
            Ok(()) => Ok(Loaded { bytes, on_disk: true, write_error: None }),
            Err(error) => {
                warn!(file = %job.file_name, %error, "failed to create cache file");
                Ok(Loaded { bytes, on_disk: false, write_error: Some(error) })
            }
        }
    }

    /// 预加载一个广告位：依次为偏移量 0..=max_offset 选出的广告调用 `ensure_cached`，
    /// 每次之间主动让出调度。
    pub async fn preload_slot(
        &self,
        catalog: &RwLock<AdCatalog>,
        slot: SlotKey,
        max_offset: usize,
        policy: InstalledAppPolicy,
    ) -> Vec<(AdKey, CacheStatus)> {
        let mut results = Vec::new();
        for offset in 0..=max_offset {
            let selected = {
                let guard = catalog.read().await;
                guard
                    .find_slot(slot.file_id, slot.slot_number)
                    .and_then(|s| select_ad(s, offset, policy).map(|index| s.ads[index].slot_letter))
            };
            let Some(letter) = selected else {
                break;
            };
            let key = slot.ad(letter);
            let status = self.ensure_cached(catalog, key).await;
            results.push((key, status));
            tokio::task::yield_now().await;
        }
        results
    }
}

/// 缓存文件丢失，需要立即持久化标记变化
pub fn is_missing_file(status: &CacheStatus) -> bool {
    matches!(
        status,
        CacheStatus::Failed(IasError::Cache(CacheError::MissingLocalFile(_)))
    )
}

/// 本地缓存文件不可用（丢失或读取失败），缓存标记已被清除，应立即重新下载
pub fn is_unusable_local_file(status: &CacheStatus) -> bool {
    matches!(
        status,
        CacheStatus::Failed(IasError::Cache(
            CacheError::MissingLocalFile(_) | CacheError::ReadFailure { .. }
        ))
    )
}
