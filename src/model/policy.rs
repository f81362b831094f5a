// src/model/policy.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 已安装应用的排除策略
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstalledAppPolicy {
    /// 第一轮排除已安装应用，所有广告都试过一遍后允许回退
    #[default]
    ExcludeWithFallback,
    /// 始终排除已安装应用
    AlwaysExclude,
    /// 不考虑安装状态
    Ignore,
}

impl InstalledAppPolicy {
    /// 在第 `step` 步时是否跳过已安装应用
    pub fn excludes_at(&self, step: usize, ad_count: usize) -> bool {
        match self {
            InstalledAppPolicy::ExcludeWithFallback => step < ad_count,
            InstalledAppPolicy::AlwaysExclude => true,
            InstalledAppPolicy::Ignore => false,
        }
    }
}

/// 每个广告位需要预加载的最大偏移量（外部配置，核心逻辑只读）
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadPolicy {
    #[serde(default)]
    pub per_slot: BTreeMap<u32, usize>,
    #[serde(default)]
    pub default_offset: usize,
}

impl PreloadPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, slot_number: u32, max_offset: usize) -> Self {
        self.per_slot.insert(slot_number, max_offset);
        self
    }

    /// 最大预加载偏移量，0 表示只加载当前广告
    pub fn max_offset(&self, slot_number: u32) -> usize {
        self.per_slot
            .get(&slot_number)
            .copied()
            .unwrap_or(self.default_offset)
    }

    /// 解析 "1:2,3:1" 形式的配置
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut policy = Self::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (slot, offset) = part
                .split_once(':')
                .ok_or_else(|| format!("Invalid preload entry: {}", part))?;
            let slot = slot
                .trim()
                .parse::<u32>()
                .map_err(|e| format!("Invalid preload slot '{}': {}", slot, e))?;
            let offset = offset
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("Invalid preload offset '{}': {}", offset, e))?;
            policy.per_slot.insert(slot, offset);
        }
        Ok(policy)
    }
}

/// 设备上已安装的（同一开发者的）应用列表
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledApps {
    packages: Vec<String>,
}

impl InstalledApps {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = packages
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { packages }
    }

    /// 解析平台桥返回的逗号分隔列表，容忍结尾逗号和空格
    pub fn from_package_list(raw: &str) -> Self {
        Self::new(raw.trim().split(','))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// 包名（忽略大小写）包含任一已安装条目即视为已安装
    pub fn is_installed(&self, package_name: &str) -> bool {
        let package_name = package_name.to_lowercase();
        self.packages.iter().any(|p| package_name.contains(p.as_str()))
    }
}
