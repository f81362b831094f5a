// src/session/store.rs

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{DecodeError, IasError};
use crate::model::catalog::{AdCatalog, ManifestFile};

/// 持久化数据的键名
pub const SESSION_KEY: &str = "IASAdvertData";

/// 当前的会话数据版本
pub const SESSION_VERSION: u32 = 1;

/// 持久化格式：带版本号的显式结构
#[derive(Serialize, Deserialize, Debug)]
struct SessionBlob {
    version: u32,
    files: Vec<ManifestFile>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// 编码目录，编码前清除只在本次会话有效的字段
pub fn encode(catalog: &AdCatalog) -> Result<String, IasError> {
    let mut snapshot = catalog.clone();
    snapshot.clear_volatile();
    let blob = SessionBlob {
        version: SESSION_VERSION,
        files: snapshot.files,
    };
    serde_json::to_string(&blob).map_err(|e| IasError::Persist(e.to_string()))
}

/// 解码目录；数据损坏或版本不兼容时返回错误，调用方应当按冷启动处理
pub fn decode(raw: &str) -> Result<AdCatalog, DecodeError> {
    let probe: VersionProbe =
        serde_json::from_str(raw).map_err(|e| DecodeError::CorruptBlob(e.to_string()))?;
    if probe.version == 0 || probe.version > SESSION_VERSION {
        return Err(DecodeError::UnsupportedVersion(probe.version));
    }

    let blob: SessionBlob =
        serde_json::from_str(raw).map_err(|e| DecodeError::CorruptBlob(e.to_string()))?;
    let mut catalog = AdCatalog { files: blob.files };
    catalog.clear_volatile();

    // 游标必须落在广告列表范围内
    for slot in catalog.files.iter_mut().flat_map(|file| file.slots.iter_mut()) {
        if slot.cursor >= slot.ads.len() {
            slot.cursor = 0;
        }
    }
    Ok(catalog)
}

/// 以文件形式保存的键值存储，每个键一个文件
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub async fn load(&self, key: &str) -> Result<Option<String>, IasError> {
        match fs::read_to_string(self.path_of(key)).await {
            Ok(raw) if raw.trim().is_empty() => Ok(None),
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IasError::Persist(e.to_string())),
        }
    }

    /// 先写临时文件再重命名，避免写一半的数据
    pub async fn save(&self, key: &str, blob: &str) -> Result<(), IasError> {
        let persist = |e: std::io::Error| IasError::Persist(e.to_string());
        fs::create_dir_all(&self.dir).await.map_err(persist)?;
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, blob).await.map_err(persist)?;
        fs::rename(&tmp, self.path_of(key)).await.map_err(persist)
    }
}
