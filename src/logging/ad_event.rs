use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IasError;

/// 事件类型，同时决定写入哪个日志文件
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdEventKind {
    Impression,
    Click,
    Error,
}

impl AdEventKind {
    pub const ALL: [AdEventKind; 3] = [AdEventKind::Impression, AdEventKind::Click, AdEventKind::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdEventKind::Impression => "impression",
            AdEventKind::Click => "click",
            AdEventKind::Error => "error",
        }
    }
}

/// **广告事件日志**
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdEvent {
    pub event_id: String,             // 事件唯一标识
    pub timestamp: String,            // 记录时间
    pub kind: AdEventKind,
    pub package_name: Option<String>, // 展示/点击的广告包名
    pub secondary: bool,              // 是否来自次级广告位（如退出页轮播）
    pub error_kind: Option<String>,   // 错误类别
    pub context: Option<String>,      // 出错位置，例如文件 ID 或广告标识
    pub message: Option<String>,
}

impl AdEvent {
    fn new(kind: AdEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            kind,
            package_name: None,
            secondary: false,
            error_kind: None,
            context: None,
            message: None,
        }
    }

    /// **创建展示日志**
    pub fn impression(package_name: &str, secondary: bool) -> Self {
        Self {
            package_name: Some(package_name.to_string()),
            secondary,
            ..Self::new(AdEventKind::Impression)
        }
    }

    /// **创建点击日志**
    pub fn click(package_name: &str, secondary: bool) -> Self {
        Self {
            package_name: Some(package_name.to_string()),
            secondary,
            ..Self::new(AdEventKind::Click)
        }
    }

    /// **创建错误日志**
    pub fn error(error: &IasError, context: &str) -> Self {
        Self {
            error_kind: Some(error.kind().to_string()),
            context: Some(context.to_string()),
            message: Some(error.to_string()),
            ..Self::new(AdEventKind::Error)
        }
    }
}
