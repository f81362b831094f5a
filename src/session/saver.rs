// src/session/saver.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{oneshot, RwLock};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error};

use crate::error::IasError;
use crate::model::catalog::AdCatalog;
use crate::session::store::{encode, BlobStore, SESSION_KEY};

enum SaveCommand {
    /// 防抖保存
    Request,
    /// 立即保存，完成后回执
    Force(oneshot::Sender<Result<(), IasError>>),
}

/// 会话保存器。
///
/// 普通保存请求在防抖窗口内合并成一次写入，窗口内每来一次请求都会重新计时；
/// 强制保存（退出、切到后台）立即写入并取消等待中的防抖。
pub struct SessionSaver {
    sender: Sender<SaveCommand>,
    writes: Arc<AtomicUsize>,
}

impl SessionSaver {
    pub fn new(catalog: Arc<RwLock<AdCatalog>>, store: BlobStore, debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(64);
        let writes = Arc::new(AtomicUsize::new(0));
        tokio::spawn(Self::background_writer(
            catalog,
            store,
            receiver,
            debounce,
            writes.clone(),
        ));
        Self { sender, writes }
    }

    /// 请求一次防抖保存
    pub fn request_save(&self) {
        // 通道满说明已经有大量待处理请求，它们本身就会触发保存
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.sender.try_send(SaveCommand::Request) {
            error!("session saver is not running");
        }
    }

    /// 立即保存并等待写入完成
    pub async fn force_save(&self) -> Result<(), IasError> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(SaveCommand::Force(ack))
            .await
            .map_err(|_| IasError::Persist("session saver is not running".to_string()))?;
        done.await
            .map_err(|_| IasError::Persist("session saver dropped the request".to_string()))?
    }

    /// 实际写盘次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn background_writer(
        catalog: Arc<RwLock<AdCatalog>>,
        store: BlobStore,
        mut receiver: Receiver<SaveCommand>,
        debounce: Duration,
        writes: Arc<AtomicUsize>,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            let command = match deadline {
                Some(at) => {
                    tokio::select! {
                        command = receiver.recv() => command,
                        _ = time::sleep_until(at) => {
                            deadline = None;
                            if let Err(e) = Self::write(&catalog, &store, &writes).await {
                                error!(error = %e, "debounced session save failed");
                            }
                            continue;
                        }
                    }
                }
                None => receiver.recv().await,
            };

            match command {
                Some(SaveCommand::Request) => {
                    deadline = Some(Instant::now() + debounce);
                }
                Some(SaveCommand::Force(ack)) => {
                    deadline = None;
                    let result = Self::write(&catalog, &store, &writes).await;
                    let _ = ack.send(result);
                }
                None => {
                    // 所有发送端都已释放，落盘后退出
                    if deadline.is_some() {
                        if let Err(e) = Self::write(&catalog, &store, &writes).await {
                            error!(error = %e, "final session save failed");
                        }
                    }
                    break;
                }
            }
        }
    }

    async fn write(
        catalog: &RwLock<AdCatalog>,
        store: &BlobStore,
        writes: &AtomicUsize,
    ) -> Result<(), IasError> {
        let blob = {
            let guard = catalog.read().await;
            encode(&guard)?
        };
        store.save(SESSION_KEY, &blob).await?;
        let count = writes.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(bytes = blob.len(), count, "session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::decode;

    fn setup(debounce_ms: u64) -> (tempfile::TempDir, Arc<RwLock<AdCatalog>>, BlobStore, SessionSaver) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(RwLock::new(AdCatalog::new()));
        let store = BlobStore::new(dir.path());
        let saver = SessionSaver::new(catalog.clone(), store.clone(), Duration::from_millis(debounce_ms));
        (dir, catalog, store, saver)
    }

    #[tokio::test]
    async fn requests_within_window_collapse() {
        let (_dir, catalog, store, saver) = setup(80);
        catalog.write().await.upsert_ad(0, 1, 'a').is_active = true;

        for _ in 0..5 {
            saver.request_save();
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(saver.write_count(), 0);

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(saver.write_count(), 1);

        let raw = store.load(SESSION_KEY).await.unwrap().unwrap();
        assert!(decode(&raw).unwrap().find_ad(0, 1, 'a').unwrap().is_active);
    }

    #[tokio::test]
    async fn force_save_bypasses_debounce() {
        let (_dir, _catalog, store, saver) = setup(10_000);
        saver.request_save();
        saver.force_save().await.unwrap();
        assert_eq!(saver.write_count(), 1);
        assert!(store.load(SESSION_KEY).await.unwrap().is_some());

        // 强制保存已经覆盖了之前的防抖请求
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(saver.write_count(), 1);
    }
}
