// src/model/manifest.rs

use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;

/// 远程广告 JSON 文件的顶层结构
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FeedDocument {
    #[serde(default)]
    pub slots: Vec<FeedSlot>,
    /// 目前只使用 slots，containers 原样保留不解析
    #[serde(default)]
    pub containers: Option<Box<OwnedValue>>,
}

/// 远程 JSON 中的单个广告位记录
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FeedSlot {
    pub slotid: String,    // 广告位 ID，例如 "1a"
    #[serde(default)]
    pub updatetime: i64,   // 更新时间戳
    #[serde(default)]
    pub active: bool,      // 是否启用
    #[serde(default)]
    pub adurl: String,     // 点击跳转地址
    #[serde(default)]
    pub imgurl: String,    // 广告图片地址
}

/// 解析并规范化后的广告记录
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdManifestEntry {
    pub slot_id: String,
    pub update_time: i64,
    pub active: bool,
    pub ad_url: String,
    pub img_url: String,
    pub slot_number: u32,    // slot id 中的数字部分
    pub slot_letter: char,   // slot id 中的字母部分
    pub package_name: String,
    pub image_ext: String,   // 图片扩展名（含 "."），可能为空
}

impl AdManifestEntry {
    /// 本地缓存文件名：slot id + 原始扩展名
    pub fn file_name(&self) -> String {
        format!("{}{}", self.slot_id, self.image_ext)
    }
}
