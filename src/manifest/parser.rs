// src/manifest/parser.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ParseError, SERVER_ERROR_SENTINEL};
use crate::model::manifest::{AdManifestEntry, FeedDocument, FeedSlot};

/// 从点击地址中提取包名的策略
pub trait PackageNameStrategy: Send + Sync {
    fn extract(&self, ad_url: &str) -> String;
}

/// 取 `id=` 参数的值，遇到 `&` 或 `?` 结束（Google Play 链接）
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryIdStrategy;

impl PackageNameStrategy for QueryIdStrategy {
    fn extract(&self, ad_url: &str) -> String {
        match ad_url.find("id=") {
            Some(pos) => ad_url[pos + 3..]
                .split(['&', '?'])
                .next()
                .unwrap_or_default()
                .to_string(),
            None => String::new(),
        }
    }
}

/// 取最后一个 `#` 之后的内容（App Store 链接）
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentStrategy;

impl PackageNameStrategy for FragmentStrategy {
    fn extract(&self, ad_url: &str) -> String {
        ad_url
            .rfind('#')
            .map(|pos| ad_url[pos + 1..].to_string())
            .unwrap_or_default()
    }
}

/// 直接使用完整的点击地址
#[derive(Debug, Clone, Copy, Default)]
pub struct FullUrlStrategy;

impl PackageNameStrategy for FullUrlStrategy {
    fn extract(&self, ad_url: &str) -> String {
        ad_url.to_string()
    }
}

/// 目标平台，决定包名提取方式
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    #[default]
    Other,
}

impl Platform {
    /// 根据编译目标推断平台
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Other
        }
    }

    pub fn strategy(&self) -> Arc<dyn PackageNameStrategy> {
        match self {
            Platform::Android => Arc::new(QueryIdStrategy),
            Platform::Ios => Arc::new(FragmentStrategy),
            Platform::Other => Arc::new(FullUrlStrategy),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "other" => Ok(Platform::Other),
            _ => Err(format!("Invalid platform: {}", s)),
        }
    }
}

/// manifest 解析器
#[derive(Clone)]
pub struct ManifestParser {
    strategy: Arc<dyn PackageNameStrategy>,
}

impl ManifestParser {
    pub fn new(strategy: Arc<dyn PackageNameStrategy>) -> Self {
        Self { strategy }
    }

    pub fn for_platform(platform: Platform) -> Self {
        Self::new(platform.strategy())
    }

    /// 把远程 JSON 文本解析成规范化的广告记录，纯函数
    pub fn parse(&self, raw: &str) -> Result<Vec<AdManifestEntry>, ParseError> {
        self.parse_bytes(raw.as_bytes().to_vec())
    }

    /// 直接解析响应体，非 UTF-8 内容按 JSON 格式错误处理
    pub fn parse_bytes(&self, mut body: Vec<u8>) -> Result<Vec<AdManifestEntry>, ParseError> {
        let sentinel = SERVER_ERROR_SENTINEL.as_bytes();
        if body.iter().all(u8::is_ascii_whitespace) || body.windows(sentinel.len()).any(|w| w == sentinel) {
            return Err(ParseError::EmptyResponse);
        }

        let document: FeedDocument = simd_json::serde::from_slice(&mut body)
            .map_err(|e| ParseError::MalformedJson(e.to_string()))?;

        document
            .slots
            .iter()
            .map(|slot| self.normalize(slot))
            .collect()
    }

    fn normalize(&self, slot: &FeedSlot) -> Result<AdManifestEntry, ParseError> {
        let (slot_number, slot_letter) = split_slot_id(&slot.slotid)?;
        Ok(AdManifestEntry {
            slot_id: slot.slotid.clone(),
            update_time: slot.updatetime,
            active: slot.active,
            ad_url: slot.adurl.clone(),
            img_url: slot.imgurl.clone(),
            slot_number,
            slot_letter,
            package_name: self.strategy.extract(&slot.adurl),
            image_ext: image_extension(&slot.imgurl),
        })
    }
}

/// 拆分 slot id，例如 "12c" → (12, 'c')
pub fn split_slot_id(slot_id: &str) -> Result<(u32, char), ParseError> {
    let malformed = || ParseError::MalformedSlotId(slot_id.to_string());

    let digits: String = slot_id.chars().filter(char::is_ascii_digit).collect();
    let slot_number = digits.parse::<u32>().map_err(|_| malformed())?;

    let mut letters = slot_id.chars().filter(char::is_ascii_lowercase);
    let slot_letter = letters.next().ok_or_else(malformed)?;
    if letters.next().is_some() {
        return Err(malformed());
    }

    Ok((slot_number, slot_letter))
}

/// 图片地址最后一段路径的扩展名（含 "."），没有则为空
pub fn image_extension(img_url: &str) -> String {
    let path = img_url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rfind('.') {
        Some(pos) if pos + 1 < last_segment.len() => last_segment[pos..].to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{
        "slots": [
            {"slotid": "1a", "updatetime": 1500000000, "active": true,
             "adurl": "https://play.google.com/store/apps/details?id=com.pickle.golf&referrer=ias",
             "imgurl": "http://ias.local/uploads/adverts/golf.png?v=3"},
            {"slotid": "12c", "updatetime": 7, "active": false,
             "adurl": "https://itunes.apple.com/app/id1#com.pickle.chess",
             "imgurl": "http://ias.local/uploads/adverts/chess.jpg"}
        ],
        "containers": [{"whatever": 1}]
    }"#;

    #[test]
    fn parses_feed_with_android_strategy() {
        let entries = ManifestParser::for_platform(Platform::Android).parse(FEED).unwrap();
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!((first.slot_number, first.slot_letter), (1, 'a'));
        assert_eq!(first.package_name, "com.pickle.golf");
        assert_eq!(first.image_ext, ".png");
        assert_eq!(first.file_name(), "1a.png");
        assert!(first.active);
        assert_eq!(first.update_time, 1_500_000_000);

        let second = &entries[1];
        assert_eq!((second.slot_number, second.slot_letter), (12, 'c'));
        assert_eq!(second.image_ext, ".jpg");
    }

    #[test]
    fn package_strategies() {
        let url = "https://itunes.apple.com/app/id1#com.pickle.chess";
        assert_eq!(FragmentStrategy.extract(url), "com.pickle.chess");
        assert_eq!(FullUrlStrategy.extract(url), url);
        assert_eq!(QueryIdStrategy.extract("https://x/details?id=com.a.b?x=1"), "com.a.b");
        assert_eq!(QueryIdStrategy.extract("https://x/details"), "");
        assert_eq!(FragmentStrategy.extract("https://x/details"), "");
    }

    #[test]
    fn rejects_empty_and_error_bodies() {
        let parser = ManifestParser::for_platform(Platform::Other);
        assert_eq!(parser.parse("   "), Err(ParseError::EmptyResponse));
        assert_eq!(
            parser.parse("<html>There was an error</html>"),
            Err(ParseError::EmptyResponse)
        );
        assert!(matches!(parser.parse("{\"slots\": ["), Err(ParseError::MalformedJson(_))));
    }

    #[test]
    fn invalid_utf8_body_is_malformed_json() {
        let parser = ManifestParser::for_platform(Platform::Android);
        let mut body = br#"{"slots":[{"slotid":"1a","adurl":""#.to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(br#"","imgurl":""}]}"#);
        assert!(matches!(parser.parse_bytes(body), Err(ParseError::MalformedJson(_))));
        assert_eq!(parser.parse_bytes(Vec::new()), Err(ParseError::EmptyResponse));
    }

    #[test]
    fn rejects_malformed_slot_ids() {
        for bad in ["a", "12", "1ab", "", "1A"] {
            assert_eq!(split_slot_id(bad), Err(ParseError::MalformedSlotId(bad.to_string())));
        }
        let feed = r#"{"slots":[{"slotid":"x","updatetime":1,"active":true,"adurl":"","imgurl":""}]}"#;
        let parser = ManifestParser::for_platform(Platform::Other);
        assert!(matches!(parser.parse(feed), Err(ParseError::MalformedSlotId(_))));
    }

    #[test]
    fn extension_edge_cases() {
        assert_eq!(image_extension("http://a/uploads/adverts/x.webp#frag"), ".webp");
        assert_eq!(image_extension("http://a/uploads/adverts/noext"), "");
        assert_eq!(image_extension("http://a.b/dir/file."), "");
        assert_eq!(image_extension(""), "");
    }
}
