// src/rotation/engine.rs

use rand::Rng;
use std::collections::HashSet;

use crate::model::catalog::{Ad, Slot};
use crate::model::policy::InstalledAppPolicy;

/// 游标简单前移一位（循环），不做任何排除
pub fn advance(slot: &mut Slot) {
    let count = slot.ads.len();
    if count == 0 {
        slot.cursor = 0;
        return;
    }
    slot.cursor = (slot.cursor + 1) % count;
}

/// 将游标随机到 [0, len - 1) 之间，仅在广告位新建或结构变化时调用
pub fn randomize_cursor<R: Rng + ?Sized>(slot: &mut Slot, rng: &mut R) {
    let count = slot.ads.len();
    slot.cursor = if count > 1 { rng.gen_range(0..count - 1) } else { 0 };
}

/// 选择偏移量为 `offset` 的广告，返回其在 `slot.ads` 中的下标。
///
/// 从 `cursor + 1` 开始向前循环扫描，最多 `2 * len` 步，跳过：
/// - 自身广告和未启用的广告
/// - 本次扫描中已出现过的包名（保证预加载窗口内不重复）
/// - 已安装应用（是否跳过由 `policy` 决定，默认只在第一轮跳过）
///
/// 第 `offset` 个（从 0 开始）符合条件的广告即为结果；不足时返回 `None`。
pub fn select_ad(slot: &Slot, offset: usize, policy: InstalledAppPolicy) -> Option<usize> {
    let count = slot.ads.len();
    if count == 0 {
        return None;
    }

    let start = slot.cursor % count + 1;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut found = 0;

    for step in 0..count * 2 {
        let index = (start + step) % count;
        let ad = &slot.ads[index];

        if !is_candidate(ad, step, count, policy) {
            continue;
        }
        if !seen.insert(ad.package_name.as_str()) {
            continue;
        }
        if found == offset {
            return Some(index);
        }
        found += 1;
    }

    None
}

/// 按 `select_ad` 的规则取出广告引用
pub fn current_ad(slot: &Slot, offset: usize, policy: InstalledAppPolicy) -> Option<&Ad> {
    select_ad(slot, offset, policy).map(|index| &slot.ads[index])
}

fn is_candidate(ad: &Ad, step: usize, count: usize, policy: InstalledAppPolicy) -> bool {
    if !ad.is_displayable() {
        return false;
    }
    !(ad.is_installed && policy.excludes_at(step, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ad(letter: char, package: &str, installed: bool) -> Ad {
        Ad {
            package_name: package.to_string(),
            is_installed: installed,
            is_active: true,
            ..Ad::new(letter)
        }
    }

    fn slot(ads: Vec<Ad>, cursor: usize) -> Slot {
        Slot { slot_number: 1, ads, cursor }
    }

    #[test]
    fn skips_installed_and_duplicate_packages() {
        let slot = slot(
            vec![
                ad('a', "pkg1", true),
                ad('b', "pkg2", false),
                ad('c', "pkg2", false),
                ad('d', "pkg3", false),
            ],
            0,
        );
        let policy = InstalledAppPolicy::ExcludeWithFallback;
        assert_eq!(select_ad(&slot, 0, policy), Some(1));
        assert_eq!(select_ad(&slot, 1, policy), Some(3));
        // 第二轮才会回退到已安装的 A
        assert_eq!(select_ad(&slot, 2, policy), Some(0));
        assert_eq!(select_ad(&slot, 3, policy), None);
        assert_eq!(select_ad(&slot, 2, InstalledAppPolicy::AlwaysExclude), None);
    }

    #[test]
    fn two_ads_pick_next_letter() {
        let slot = slot(vec![ad('a', "p1", false), ad('b', "p2", false)], 0);
        let picked = current_ad(&slot, 0, InstalledAppPolicy::default()).unwrap();
        assert_eq!(picked.slot_letter, 'b');
    }

    #[test]
    fn falls_back_to_installed_when_nothing_else() {
        let slot = slot(vec![ad('a', "p1", true), ad('b', "p2", true)], 1);
        assert_eq!(select_ad(&slot, 0, InstalledAppPolicy::ExcludeWithFallback), Some(0));
        assert_eq!(select_ad(&slot, 0, InstalledAppPolicy::AlwaysExclude), None);
        assert_eq!(select_ad(&slot, 0, InstalledAppPolicy::Ignore), Some(0));
    }

    #[test]
    fn self_and_inactive_only_is_unavailable() {
        let mut own = ad('a', "com.me.game", false);
        own.is_self = true;
        let mut off = ad('b', "p2", false);
        off.is_active = false;
        let slot = slot(vec![own, off], 0);
        assert_eq!(select_ad(&slot, 0, InstalledAppPolicy::default()), None);
    }

    #[test]
    fn empty_slot() {
        let mut empty = slot(Vec::new(), 0);
        advance(&mut empty);
        assert_eq!(empty.cursor, 0);
        assert_eq!(select_ad(&empty, 0, InstalledAppPolicy::default()), None);
        randomize_cursor(&mut empty, &mut StdRng::seed_from_u64(3));
        assert_eq!(empty.cursor, 0);
    }

    fn arb_ad() -> impl Strategy<Value = Ad> {
        (0u8..4, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(pkg, installed, own, active)| Ad {
            package_name: format!("pkg{}", pkg),
            is_installed: installed,
            is_self: own,
            is_active: active,
            ..Ad::new('x')
        })
    }

    proptest! {
        #[test]
        fn advance_is_cyclic(count in 1usize..20, start in 0usize..20) {
            let ads = (0..count).map(|_| Ad::new('x')).collect();
            let mut s = slot(ads, start % count);
            let before = s.cursor;
            for _ in 0..count {
                advance(&mut s);
                prop_assert!(s.cursor < count);
            }
            prop_assert_eq!(s.cursor, before);
        }

        #[test]
        fn never_selects_self_or_inactive(
            ads in prop::collection::vec(arb_ad(), 0..10),
            cursor in 0usize..10,
            offset in 0usize..5,
        ) {
            let s = slot(ads, cursor);
            for policy in [
                InstalledAppPolicy::ExcludeWithFallback,
                InstalledAppPolicy::AlwaysExclude,
                InstalledAppPolicy::Ignore,
            ] {
                if let Some(index) = select_ad(&s, offset, policy) {
                    prop_assert!(!s.ads[index].is_self);
                    prop_assert!(s.ads[index].is_active);
                }
            }
        }

        #[test]
        fn randomized_cursor_stays_in_range(count in 0usize..30, seed in any::<u64>()) {
            let ads = (0..count).map(|_| Ad::new('x')).collect();
            let mut s = slot(ads, 0);
            randomize_cursor(&mut s, &mut StdRng::seed_from_u64(seed));
            prop_assert!(s.cursor < count.max(1));
            if count > 1 {
                prop_assert!(s.cursor < count - 1);
            }
        }
    }
}
