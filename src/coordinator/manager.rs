// src/coordinator/manager.rs

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::image_cache::{is_unusable_local_file, CacheStatus, ImageCache};
use crate::cache::storage::ImageStorage;
use crate::config::IasConfig;
use crate::error::IasError;
use crate::fetch::client::{Fetcher, HttpFetcher};
use crate::logging::ad_event::AdEvent;
use crate::logging::event_logger::EventLogger;
use crate::manifest::parser::ManifestParser;
use crate::model::catalog::{dropped_textures, merge_file, AdCatalog, AdKey, ManifestFile, SlotKey};
use crate::rotation::engine::{advance, current_ad};
use crate::session::saver::SessionSaver;
use crate::session::store::{decode, BlobStore, SESSION_KEY};

/// 推送给 UI 的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IasEvent {
    /// 某条广告的图片已可用
    ImageDownloaded(AdKey),
    /// 调用方要求所有展示该广告位的组件立即切换
    ForceChangeWanted(SlotKey),
}

#[derive(Default)]
struct RefreshState {
    last_refresh: Option<Instant>,
}

/// 广告服务：持有目录、图片缓存和会话保存器，由宿主显式创建并管理生命周期
pub struct IasManager {
    config: IasConfig,
    catalog: Arc<RwLock<AdCatalog>>,
    parser: ManifestParser,
    fetcher: Arc<dyn Fetcher>,
    cache: ImageCache,
    store: BlobStore,
    saver: SessionSaver,
    events: broadcast::Sender<IasEvent>,
    event_logger: Option<Arc<EventLogger>>,
    rng: Mutex<StdRng>,
    state: Mutex<RefreshState>,
}

impl IasManager {
    /// 使用 reqwest 作为网络层
    pub fn with_http(config: IasConfig, event_logger: Option<Arc<EventLogger>>) -> Arc<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout));
        Self::new(config, fetcher, event_logger)
    }

    pub fn new(
        config: IasConfig,
        fetcher: Arc<dyn Fetcher>,
        event_logger: Option<Arc<EventLogger>>,
    ) -> Arc<Self> {
        Self::with_rng(config, fetcher, event_logger, StdRng::from_entropy())
    }

    /// 指定随机数生成器，便于复现游标随机化
    pub fn with_rng(
        config: IasConfig,
        fetcher: Arc<dyn Fetcher>,
        event_logger: Option<Arc<EventLogger>>,
        rng: StdRng,
    ) -> Arc<Self> {
        let catalog = Arc::new(RwLock::new(AdCatalog::new()));
        let store = BlobStore::new(config.state_dir.clone());
        let saver = SessionSaver::new(catalog.clone(), store.clone(), config.save_debounce);
        let cache = ImageCache::new(
            ImageStorage::new(config.cache_dir.clone()),
            fetcher.clone(),
            config.use_storage_cache,
        );
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            parser: ManifestParser::for_platform(config.platform),
            config,
            catalog,
            fetcher,
            cache,
            store,
            saver,
            events,
            event_logger,
            rng: Mutex::new(rng),
            state: Mutex::new(RefreshState::default()),
        })
    }

    pub fn config(&self) -> &IasConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<RwLock<AdCatalog>> {
        &self.catalog
    }

    pub fn saver(&self) -> &SessionSaver {
        &self.saver
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IasEvent> {
        self.events.subscribe()
    }

    /// 启动：加载会话 → 立即刷新已恢复的广告位 → 拉取所有 manifest。
    /// 返回是否成功恢复了上次的会话数据。
    pub async fn init(&self) -> bool {
        info!(
            bundle_id = %self.config.bundle_id,
            files = self.config.file_count(),
            installed = self.config.installed_apps.len(),
            "IAS init"
        );
        if self.config.has_placeholder_bundle_id() {
            warn!("IAS bundle identifier is still the placeholder value");
        }

        let restored = self.load_session().await;
        if restored {
            let slots = self.catalog.read().await.slot_keys();
            self.refresh_slots(slots).await;
        }

        self.refresh_all().await;
        restored
    }

    /// 宿主循环定期调用；距离上次拉取超过刷新间隔时重新拉取 manifest
    pub async fn tick(&self) -> bool {
        let due = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .last_refresh
                .map_or(true, |at| at.elapsed() >= self.config.refresh_interval)
        };
        if due {
            self.refresh_all().await;
        }
        due
    }

    /// 退出：强制保存并刷出事件日志
    pub async fn shutdown(&self) {
        if let Err(e) = self.saver.force_save().await {
            self.report(&e, "shutdown").await;
        }
        if let Some(logger) = &self.event_logger {
            logger.flush().await;
        }
        info!("IAS shut down");
    }

    pub async fn on_pause(&self, paused: bool) {
        if paused {
            self.force_save("pause").await;
        }
    }

    pub async fn on_focus(&self, focused: bool) {
        if !focused {
            self.force_save("focus").await;
        }
    }

    /// 在后台执行一次完整刷新，错误只会被记录
    pub fn spawn_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.refresh_all().await;
        })
    }

    /// 依次刷新每个 manifest 文件，单个文件失败不影响其他文件，全部完成后保存。
    /// 所有文件都失败时不记录刷新时间，下一次 tick 会立即重试。
    pub async fn refresh_all(&self) {
        let mut reached = false;
        for file_id in 0..self.config.file_count() {
            match self.refresh_manifest(file_id).await {
                Ok(_) => reached = true,
                Err(e) => self.report(&e, &format!("file {}", file_id)).await,
            }
        }
        if reached {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.last_refresh = Some(Instant::now());
        }
        self.force_save("refresh").await;
    }

    /// 拉取并合并一个 manifest 文件，返回需要刷新的广告位
    pub async fn refresh_manifest(&self, file_id: usize) -> Result<BTreeSet<SlotKey>, IasError> {
        let url = self
            .config
            .manifest_urls
            .get(file_id)
            .ok_or(IasError::UnknownFile(file_id))?;

        let body = self.fetcher.fetch_bytes(url).await?;
        let entries = self.parser.parse_bytes(body)?;

        let mut fragment = ManifestFile::default();
        for entry in &entries {
            fragment
                .upsert_slot(entry.slot_number)
                .upsert_ad(entry.slot_letter)
                .apply_entry(entry, &self.config.bundle_id, &self.config.installed_apps);
            tokio::task::yield_now().await;
        }

        let (changed, released) = {
            let mut catalog = self.catalog.write().await;
            let released = catalog
                .file(file_id)
                .map(|old| dropped_textures(old, &fragment))
                .unwrap_or_default();
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            let (merged, changed) = merge_file(catalog.file(file_id), fragment, file_id, &mut *rng);
            *catalog.upsert_file(file_id) = merged;
            (changed, released)
        };
        self.cache.release(&released).await;

        info!(file_id, entries = entries.len(), changed = changed.len(), "manifest refreshed");
        self.refresh_slots(changed.iter().copied().collect()).await;
        Ok(changed)
    }

    /// 切换广告位到下一条广告并预加载；`force_notify` 时通知所有展示组件
    pub async fn refresh_slot(&self, file_id: usize, slot_number: u32, force_notify: bool) {
        self.refresh_slots(vec![SlotKey::new(file_id, slot_number)]).await;
        if force_notify {
            let _ = self.events.send(IasEvent::ForceChangeWanted(SlotKey::new(file_id, slot_number)));
        }
    }

    async fn refresh_slots(&self, slots: Vec<SlotKey>) {
        {
            let mut catalog = self.catalog.write().await;
            for key in &slots {
                if let Some(slot) = catalog.find_slot_mut(key.file_id, key.slot_number) {
                    advance(slot);
                }
            }
        }
        self.saver.request_save();

        let preloads = slots.iter().map(|key| {
            self.cache.preload_slot(
                &self.catalog,
                *key,
                self.config.preload.max_offset(key.slot_number),
                self.config.installed_policy,
            )
        });
        let results: Vec<_> = join_all(preloads).await.into_iter().flatten().collect();
        self.handle_cache_results(results).await;
    }

    async fn handle_cache_results(&self, results: Vec<(AdKey, CacheStatus)>) {
        let mut redownload = Vec::new();
        for (key, status) in results {
            if is_unusable_local_file(&status) {
                redownload.push(key);
            }
            self.handle_cache_status(key, status).await;
        }
        if redownload.is_empty() {
            return;
        }

        // 缓存标记已清除，先落盘再重新下载
        self.force_save("cache recovery").await;
        for key in redownload {
            let status = self.cache.ensure_cached(&self.catalog, key).await;
            self.handle_cache_status(key, status).await;
        }
        self.saver.request_save();
    }

    async fn handle_cache_status(&self, key: AdKey, status: CacheStatus) {
        match status {
            CacheStatus::Ready => {
                let _ = self.events.send(IasEvent::ImageDownloaded(key));
            }
            CacheStatus::ReadyNotStored(e) => {
                let _ = self.events.send(IasEvent::ImageDownloaded(key));
                self.report(&e, &key.to_string()).await;
            }
            CacheStatus::Failed(e) => {
                self.report(&e, &key.to_string()).await;
            }
            CacheStatus::Pending | CacheStatus::Ineligible => {
                debug!(ad = %key, ?status, "preload skipped");
            }
        }
    }

    async fn load_session(&self) -> bool {
        let raw = match self.store.load(SESSION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                self.report(&e, "session load").await;
                return false;
            }
        };
        match decode(&raw) {
            Ok(restored) => {
                let mut catalog = self.catalog.write().await;
                *catalog = restored;
                info!(files = catalog.file_count(), "cached IAS data loaded");
                true
            }
            Err(e) => {
                self.report(&e.into(), "session decode").await;
                false
            }
        }
    }

    async fn force_save(&self, reason: &str) {
        if let Err(e) = self.saver.force_save().await {
            self.report(&e, reason).await;
        }
    }

    /// 错误统一上报：tracing + 事件日志
    async fn report(&self, e: &IasError, context: &str) {
        error!(kind = e.kind(), context, error = %e, "IAS error");
        if let Some(logger) = &self.event_logger {
            logger.log(AdEvent::error(e, context)).await;
        }
    }

    /// 偏移量为 `offset` 的广告图片是否已可用
    pub async fn is_ad_ready(&self, file_id: usize, slot_number: u32, offset: usize) -> bool {
        let catalog = self.catalog.read().await;
        catalog
            .find_slot(file_id, slot_number)
            .and_then(|slot| current_ad(slot, offset, self.config.installed_policy))
            .is_some_and(|ad| ad.is_texture_ready)
    }

    pub async fn get_ad_url(&self, file_id: usize, slot_number: u32, offset: usize) -> Option<String> {
        let catalog = self.catalog.read().await;
        let slot = catalog.find_slot(file_id, slot_number)?;
        current_ad(slot, offset, self.config.installed_policy).map(|ad| ad.ad_url.clone())
    }

    pub async fn get_ad_package_name(&self, file_id: usize, slot_number: u32, offset: usize) -> Option<String> {
        let catalog = self.catalog.read().await;
        let slot = catalog.find_slot(file_id, slot_number)?;
        current_ad(slot, offset, self.config.installed_policy).map(|ad| ad.package_name.clone())
    }

    /// 当前广告的图片字节，未就绪时为 None
    pub async fn get_ad_image(&self, file_id: usize, slot_number: u32, offset: usize) -> Option<Arc<Vec<u8>>> {
        let texture_id = {
            let catalog = self.catalog.read().await;
            let slot = catalog.find_slot(file_id, slot_number)?;
            let ad = current_ad(slot, offset, self.config.installed_policy)?;
            if !ad.is_texture_ready {
                return None;
            }
            ad.texture_id?
        };
        self.cache.image(texture_id).await
    }

    /// 每次展示广告时调用
    pub async fn record_impression(&self, package_name: &str, secondary: bool) {
        debug!(package_name, secondary, "IAS view");
        if let Some(logger) = &self.event_logger {
            logger.log(AdEvent::impression(package_name, secondary)).await;
        }
    }

    /// 每次点击广告时调用
    pub async fn record_click(&self, package_name: &str, secondary: bool) {
        debug!(package_name, secondary, "IAS click");
        if let Some(logger) = &self.event_logger {
            logger.log(AdEvent::click(package_name, secondary)).await;
        }
    }
}
