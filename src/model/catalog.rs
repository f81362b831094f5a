// src/model/catalog.rs

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::manifest::AdManifestEntry;
use crate::model::policy::InstalledApps;
use crate::rotation::engine::randomize_cursor;

/// 广告位标识：(文件 ID, 广告位数字)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub file_id: usize,
    pub slot_number: u32,
}

impl SlotKey {
    pub fn new(file_id: usize, slot_number: u32) -> Self {
        Self { file_id, slot_number }
    }

    pub fn ad(&self, slot_letter: char) -> AdKey {
        AdKey::new(self.file_id, self.slot_number, slot_letter)
    }
}

/// 广告标识：(文件 ID, 广告位数字, 广告位字母)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdKey {
    pub file_id: usize,
    pub slot_number: u32,
    pub slot_letter: char,
}

impl AdKey {
    pub fn new(file_id: usize, slot_number: u32, slot_letter: char) -> Self {
        Self { file_id, slot_number, slot_letter }
    }

    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.file_id, self.slot_number)
    }
}

impl fmt::Display for AdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.file_id, self.slot_number, self.slot_letter)
    }
}

/// 单条广告
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Ad {
    pub slot_letter: char,            // 广告位字母，在同一 Slot 内唯一
    pub file_name: String,            // 本地缓存文件名
    pub is_texture_file_cached: bool, // 图片是否已写入本地
    #[serde(skip)]
    pub is_texture_ready: bool,       // 图片是否已加载到内存
    #[serde(skip)]
    pub is_downloading: bool,         // 是否正在下载
    pub is_installed: bool,           // 对应应用是否已安装
    pub is_self: bool,                // 是否为当前应用自身的广告
    pub is_active: bool,              // JSON 中是否启用
    pub last_cache_refresh: i64,      // 最近一次加载图片时对应的更新时间
    pub latest_known_update: i64,     // 最新获取到的更新时间
    pub cached_update_time: i64,      // 本地缓存文件对应的更新时间
    pub img_url: String,
    pub ad_url: String,
    pub package_name: String,
    #[serde(skip)]
    pub texture_id: Option<usize>,    // 内存图片句柄
}

impl Ad {
    pub fn new(slot_letter: char) -> Self {
        Self {
            slot_letter,
            ..Default::default()
        }
    }

    /// 是否可能被展示（非自身广告且启用）
    pub fn is_displayable(&self) -> bool {
        !self.is_self && self.is_active
    }

    /// 服务端数据比已加载的图片新
    pub fn is_stale(&self) -> bool {
        self.last_cache_refresh < self.latest_known_update
    }

    /// 用 manifest 记录更新广告元数据，不触碰缓存状态
    pub fn apply_entry(&mut self, entry: &AdManifestEntry, bundle_id: &str, installed: &InstalledApps) {
        self.file_name = entry.file_name();
        self.is_self = !bundle_id.is_empty() && entry.package_name.contains(bundle_id);
        self.is_active = entry.active;
        self.is_installed = installed.is_installed(&entry.package_name);
        self.ad_url = entry.ad_url.clone();
        self.img_url = entry.img_url.clone();
        self.package_name = entry.package_name.clone();
        self.latest_known_update = entry.update_time;
    }

    /// 从旧记录继承缓存相关状态
    fn carry_cache_state(&mut self, previous: &Ad) {
        self.is_texture_file_cached = previous.is_texture_file_cached;
        self.cached_update_time = previous.cached_update_time;
        self.is_texture_ready = previous.is_texture_ready;
        self.is_downloading = previous.is_downloading;
        self.last_cache_refresh = previous.last_cache_refresh;
        self.texture_id = previous.texture_id;
    }

    /// 清除只在本次会话有效的字段
    pub fn clear_volatile(&mut self) {
        self.texture_id = None;
        self.is_texture_ready = false;
        self.is_downloading = false;
        self.last_cache_refresh = 0;
    }
}

/// 广告位（轮播单元）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Slot {
    pub slot_number: u32,
    pub ads: Vec<Ad>,
    pub cursor: usize, // 上一次展示的广告下标，跨会话保存
}

impl Slot {
    pub fn new(slot_number: u32) -> Self {
        Self {
            slot_number,
            ads: Vec::new(),
            cursor: 0,
        }
    }

    pub fn find_ad(&self, slot_letter: char) -> Option<&Ad> {
        self.ads.iter().find(|ad| ad.slot_letter == slot_letter)
    }

    pub fn find_ad_mut(&mut self, slot_letter: char) -> Option<&mut Ad> {
        self.ads.iter_mut().find(|ad| ad.slot_letter == slot_letter)
    }

    pub fn upsert_ad(&mut self, slot_letter: char) -> &mut Ad {
        let index = match self.ads.iter().position(|ad| ad.slot_letter == slot_letter) {
            Some(index) => index,
            None => {
                self.ads.push(Ad::new(slot_letter));
                self.ads.len() - 1
            }
        };
        &mut self.ads[index]
    }
}

/// 一个 manifest URL 对应的所有广告位
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestFile {
    pub slots: Vec<Slot>,
}

impl ManifestFile {
    pub fn find_slot(&self, slot_number: u32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.slot_number == slot_number)
    }

    pub fn find_slot_mut(&mut self, slot_number: u32) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.slot_number == slot_number)
    }

    pub fn upsert_slot(&mut self, slot_number: u32) -> &mut Slot {
        let index = match self.slots.iter().position(|slot| slot.slot_number == slot_number) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::new(slot_number));
                self.slots.len() - 1
            }
        };
        &mut self.slots[index]
    }
}

/// 内存中的广告目录：文件 → 广告位 → 广告
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AdCatalog {
    pub files: Vec<ManifestFile>,
}

impl AdCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, file_id: usize) -> Option<&ManifestFile> {
        self.files.get(file_id)
    }

    /// 不存在则补齐到 file_id
    pub fn upsert_file(&mut self, file_id: usize) -> &mut ManifestFile {
        if self.files.len() <= file_id {
            self.files.resize_with(file_id + 1, ManifestFile::default);
        }
        &mut self.files[file_id]
    }

    pub fn upsert_slot(&mut self, file_id: usize, slot_number: u32) -> &mut Slot {
        self.upsert_file(file_id).upsert_slot(slot_number)
    }

    pub fn upsert_ad(&mut self, file_id: usize, slot_number: u32, slot_letter: char) -> &mut Ad {
        self.upsert_slot(file_id, slot_number).upsert_ad(slot_letter)
    }

    pub fn find_slot(&self, file_id: usize, slot_number: u32) -> Option<&Slot> {
        self.files.get(file_id)?.find_slot(slot_number)
    }

    pub fn find_slot_mut(&mut self, file_id: usize, slot_number: u32) -> Option<&mut Slot> {
        self.files.get_mut(file_id)?.find_slot_mut(slot_number)
    }

    pub fn find_ad(&self, file_id: usize, slot_number: u32, slot_letter: char) -> Option<&Ad> {
        self.find_slot(file_id, slot_number)?.find_ad(slot_letter)
    }

    pub fn find_ad_mut(&mut self, key: &AdKey) -> Option<&mut Ad> {
        self.find_slot_mut(key.file_id, key.slot_number)?
            .find_ad_mut(key.slot_letter)
    }

    pub fn ad(&self, key: &AdKey) -> Option<&Ad> {
        self.find_ad(key.file_id, key.slot_number, key.slot_letter)
    }

    /// 所有广告位，按文件和插入顺序稳定遍历
    pub fn slot_keys(&self) -> Vec<SlotKey> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(file_id, file)| {
                file.slots
                    .iter()
                    .map(move |slot| SlotKey::new(file_id, slot.slot_number))
            })
            .collect()
    }

    pub fn slot_keys_of(&self, file_id: usize) -> Vec<SlotKey> {
        self.files
            .get(file_id)
            .map(|file| {
                file.slots
                    .iter()
                    .map(|slot| SlotKey::new(file_id, slot.slot_number))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear_volatile(&mut self) {
        self.files
            .iter_mut()
            .flat_map(|file| file.slots.iter_mut())
            .flat_map(|slot| slot.ads.iter_mut())
            .for_each(Ad::clear_volatile);
    }

    /// 合并新旧目录，返回合并结果以及需要刷新的广告位
    pub fn merge<R: Rng + ?Sized>(old: &AdCatalog, new: AdCatalog, rng: &mut R) -> (AdCatalog, BTreeSet<SlotKey>) {
        let mut changed = BTreeSet::new();
        let mut files = Vec::with_capacity(new.files.len());
        for (file_id, file) in new.files.into_iter().enumerate() {
            let (merged, file_changed) = merge_file(old.files.get(file_id), file, file_id, rng);
            changed.extend(file_changed);
            files.push(merged);
        }
        (AdCatalog { files }, changed)
    }
}

/// 合并单个文件。
///
/// 新旧都存在的广告继承旧的缓存状态；广告列表结构未变的广告位继承游标，
/// 否则随机化游标。更新时间变大或之前为 0 的广告位会被标记为需要刷新。
pub fn merge_file<R: Rng + ?Sized>(
    old: Option<&ManifestFile>,
    mut new: ManifestFile,
    file_id: usize,
    rng: &mut R,
) -> (ManifestFile, BTreeSet<SlotKey>) {
    let mut changed = BTreeSet::new();

    for slot in new.slots.iter_mut() {
        let old_slot = old.and_then(|file| file.find_slot(slot.slot_number));
        // 游标是下标，字母顺序变了也要重新随机
        let mut structural = old_slot.map_or(true, |o| {
            o.ads
                .iter()
                .map(|ad| ad.slot_letter)
                .ne(slot.ads.iter().map(|ad| ad.slot_letter))
        });
        let mut needs_refresh = old_slot.is_none();

        for ad in slot.ads.iter_mut() {
            match old_slot.and_then(|o| o.find_ad(ad.slot_letter)) {
                Some(previous) => {
                    ad.carry_cache_state(previous);
                    if previous.latest_known_update < ad.latest_known_update
                        || previous.latest_known_update == 0
                    {
                        needs_refresh = true;
                    }
                }
                None => {
                    structural = true;
                    needs_refresh = true;
                }
            }
        }

        match old_slot {
            Some(previous) if !structural => slot.cursor = previous.cursor,
            _ => randomize_cursor(slot, rng),
        }

        if needs_refresh {
            changed.insert(SlotKey::new(file_id, slot.slot_number));
        }
    }

    (new, changed)
}

/// 旧文件中有内存图片、但在新文件中已不存在的广告的图片句柄
pub fn dropped_textures(old: &ManifestFile, new: &ManifestFile) -> Vec<usize> {
    old.slots
        .iter()
        .flat_map(|slot| {
            let kept = new.find_slot(slot.slot_number);
            slot.ads
                .iter()
                .filter(move |ad| kept.and_then(|k| k.find_ad(ad.slot_letter)).is_none())
        })
        .filter_map(|ad| ad.texture_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ad(letter: char, update: i64) -> Ad {
        Ad {
            latest_known_update: update,
            is_active: true,
            img_url: format!("http://cdn.local/uploads/adverts/{}.png", letter),
            ..Ad::new(letter)
        }
    }

    fn file_with(slot_number: u32, ads: Vec<Ad>) -> ManifestFile {
        ManifestFile {
            slots: vec![Slot { slot_number, ads, cursor: 0 }],
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut catalog = AdCatalog::new();
        catalog.upsert_ad(1, 2, 'a').img_url = "x".to_string();
        catalog.upsert_ad(1, 2, 'a');
        catalog.upsert_ad(1, 2, 'b');

        assert_eq!(catalog.file_count(), 2);
        assert!(catalog.file(0).unwrap().slots.is_empty());
        let slot = catalog.find_slot(1, 2).unwrap();
        assert_eq!(slot.ads.len(), 2);
        assert_eq!(catalog.find_ad(1, 2, 'a').unwrap().img_url, "x");
        assert!(catalog.find_ad(1, 3, 'a').is_none());
        assert!(catalog.find_ad(5, 2, 'a').is_none());
    }

    #[test]
    fn merge_drops_entries_missing_from_new() {
        let mut rng = StdRng::seed_from_u64(7);
        let old = file_with(1, vec![ad('a', 10), ad('b', 10)]);
        let new = file_with(1, vec![ad('a', 10)]);
        let (merged, _) = merge_file(Some(&old), new, 0, &mut rng);
        assert_eq!(merged.slots[0].ads.len(), 1);
        assert_eq!(merged.slots[0].cursor, 0);
    }

    #[test]
    fn merge_rerandomizes_cursor_when_letters_reorder() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut old = file_with(1, vec![ad('a', 10), ad('b', 10), ad('c', 10)]);
        old.slots[0].cursor = 2;
        let new = file_with(1, vec![ad('c', 10), ad('a', 10), ad('b', 10)]);

        let (merged, changed) = merge_file(Some(&old), new, 0, &mut rng);
        // 随机范围是 [0, len - 1)，不可能保持旧值 2
        assert!(merged.slots[0].cursor < 2);
        assert!(changed.is_empty());
    }

    #[test]
    fn dropped_textures_lists_removed_ads_only() {
        let mut kept = ad('a', 10);
        kept.texture_id = Some(0);
        let mut removed = ad('b', 10);
        removed.texture_id = Some(1);
        let unloaded = ad('c', 10);
        let mut gone_slot = ad('a', 10);
        gone_slot.texture_id = Some(2);
        let old = ManifestFile {
            slots: vec![
                Slot { slot_number: 1, ads: vec![kept, removed, unloaded], cursor: 0 },
                Slot { slot_number: 2, ads: vec![gone_slot], cursor: 0 },
            ],
        };
        let new = file_with(1, vec![ad('a', 11)]);

        assert_eq!(dropped_textures(&old, &new), vec![1, 2]);
    }

    #[test]
    fn merge_flags_newer_and_unknown_slots() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut old = AdCatalog::new();
        old.files.push(ManifestFile {
            slots: vec![
                Slot { slot_number: 1, ads: vec![ad('a', 10)], cursor: 0 },
                Slot { slot_number: 2, ads: vec![ad('a', 10)], cursor: 0 },
                Slot { slot_number: 3, ads: vec![ad('a', 0)], cursor: 0 },
            ],
        });
        let mut new = AdCatalog::new();
        new.files.push(ManifestFile {
            slots: vec![
                Slot { slot_number: 1, ads: vec![ad('a', 10)], cursor: 0 },
                Slot { slot_number: 2, ads: vec![ad('a', 11)], cursor: 0 },
                Slot { slot_number: 3, ads: vec![ad('a', 5)], cursor: 0 },
                Slot { slot_number: 4, ads: vec![ad('a', 5)], cursor: 0 },
            ],
        });

        let (_, changed) = AdCatalog::merge(&old, new, &mut rng);
        let changed: Vec<u32> = changed.iter().map(|k| k.slot_number).collect();
        assert_eq!(changed, vec![2, 3, 4]);
    }

    #[test]
    fn clear_volatile_resets_session_fields() {
        let mut catalog = AdCatalog::new();
        let entry = catalog.upsert_ad(0, 1, 'a');
        entry.texture_id = Some(3);
        entry.is_texture_ready = true;
        entry.is_downloading = true;
        entry.last_cache_refresh = 99;
        entry.is_texture_file_cached = true;

        catalog.clear_volatile();
        let entry = catalog.find_ad(0, 1, 'a').unwrap();
        assert_eq!(entry.texture_id, None);
        assert!(!entry.is_texture_ready && !entry.is_downloading);
        assert_eq!(entry.last_cache_refresh, 0);
        assert!(entry.is_texture_file_cached);
    }

    proptest! {
        #[test]
        fn merge_preserves_cursor_and_cache_for_identical_structure(
            count in 1usize..8,
            cursor_seed in 0usize..64,
            updates in prop::collection::vec(0i64..1_000, 8),
            cached in prop::collection::vec(any::<bool>(), 8),
        ) {
            let mut rng = StdRng::seed_from_u64(1);
            let letters: Vec<char> = ('a'..='z').take(count).collect();

            let mut old_slot = Slot::new(1);
            for (i, letter) in letters.iter().enumerate() {
                let mut entry = ad(*letter, updates[i]);
                entry.is_texture_file_cached = cached[i];
                entry.is_texture_ready = cached[i];
                entry.cached_update_time = updates[i];
                entry.texture_id = if cached[i] { Some(i) } else { None };
                old_slot.ads.push(entry);
            }
            old_slot.cursor = cursor_seed % count;
            let old = ManifestFile { slots: vec![old_slot.clone()] };

            let mut new_slot = Slot::new(1);
            for (i, letter) in letters.iter().enumerate() {
                let mut entry = ad(*letter, updates[i] + 1);
                entry.img_url = format!("http://other.local/{}.jpg", letter);
                new_slot.ads.push(entry);
            }
            let new = ManifestFile { slots: vec![new_slot] };

            let (merged, _) = merge_file(Some(&old), new, 0, &mut rng);
            let merged_slot = &merged.slots[0];
            prop_assert_eq!(merged_slot.cursor, old_slot.cursor);
            for (before, after) in old_slot.ads.iter().zip(merged_slot.ads.iter()) {
                prop_assert_eq!(before.is_texture_file_cached, after.is_texture_file_cached);
                prop_assert_eq!(before.is_texture_ready, after.is_texture_ready);
                prop_assert_eq!(before.texture_id, after.texture_id);
                prop_assert_eq!(before.cached_update_time, after.cached_update_time);
            }
        }
    }
}
