// src/cache/storage.rs

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::CacheError;

/// 本地缓存文件名前缀
const FILE_PREFIX: &str = "IAS_";

/// 磁盘上的广告图片缓存目录
#[derive(Debug, Clone)]
pub struct ImageStorage {
    dir: PathBuf,
}

impl ImageStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", FILE_PREFIX, file_name))
    }

    pub async fn exists(&self, file_name: &str) -> bool {
        fs::try_exists(self.path_of(file_name)).await.unwrap_or(false)
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, CacheError> {
        match fs::read(self.path_of(file_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CacheError::MissingLocalFile(file_name.to_string()))
            }
            Err(e) => Err(CacheError::ReadFailure {
                file: file_name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let failure = |e: std::io::Error| CacheError::WriteFailure {
            file: file_name.to_string(),
            reason: e.to_string(),
        };
        fs::create_dir_all(&self.dir).await.map_err(failure)?;
        fs::write(self.path_of(file_name), bytes).await.map_err(failure)
    }
}

/// 内存中的图片，广告只保存下标作为句柄；释放后的下标会被复用
#[derive(Debug, Default)]
pub struct ImageStore {
    images: RwLock<Vec<Option<Arc<Vec<u8>>>>>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 有旧句柄时原地替换，否则占用第一个空位或追加
    pub async fn insert(&self, previous: Option<usize>, bytes: Vec<u8>) -> usize {
        let mut images = self.images.write().await;
        let bytes = Some(Arc::new(bytes));
        if let Some(id) = previous.filter(|id| *id < images.len()) {
            images[id] = bytes;
            return id;
        }
        match images.iter().position(Option::is_none) {
            Some(id) => {
                images[id] = bytes;
                id
            }
            None => {
                images.push(bytes);
                images.len() - 1
            }
        }
    }

    pub async fn get(&self, id: usize) -> Option<Arc<Vec<u8>>> {
        self.images.read().await.get(id).cloned().flatten()
    }

    /// 释放不再被任何广告引用的图片
    pub async fn release(&self, ids: &[usize]) {
        let mut images = self.images.write().await;
        for id in ids {
            if let Some(slot) = images.get_mut(*id) {
                *slot = None;
            }
        }
    }

    /// 仍在内存中的图片数量
    pub async fn len(&self) -> usize {
        self.images.read().await.iter().filter(|image| image.is_some()).count()
    }
}
