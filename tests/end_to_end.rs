use std::time::Duration;

use rust_ias::manifest::parser::Platform;
use rust_ias::mock_feed::spawn_mock_feed;
use rust_ias::{IasConfig, IasManager};

fn config(base: &str, dir: &std::path::Path) -> IasConfig {
    IasConfig {
        manifest_urls: vec![format!("{}/ad/1.json", base), format!("{}/ad/2.json", base)],
        bundle_id: "com.pickle.chess".to_string(),
        platform: Platform::Android,
        cache_dir: dir.join("cache"),
        state_dir: dir.join("state"),
        fetch_timeout: Duration::from_secs(5),
        save_debounce: Duration::from_millis(20),
        ..IasConfig::default()
    }
}

#[tokio::test]
async fn serves_adverts_from_mock_feed() {
    let (addr, server) = spawn_mock_feed(0).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let base = format!("http://{}", addr);

    let manager = IasManager::with_http(config(&base, dir.path()), None);
    assert!(!manager.init().await);

    // 第二个文件返回错误，不影响第一个文件
    for slot in [1, 2] {
        assert!(manager.is_ad_ready(0, slot, 0).await, "slot {} not ready", slot);
        let package = manager.get_ad_package_name(0, slot, 0).await.unwrap();
        assert_ne!(package, "com.pickle.chess");
        let image = manager.get_ad_image(0, slot, 0).await.unwrap();
        assert!(image.starts_with(&[0x89, b'P', b'N', b'G']));
    }
    assert!(manager.catalog().read().await.file(1).map_or(true, |f| f.slots.is_empty()));

    manager.shutdown().await;
    drop(manager);

    // 再次启动时恢复会话，图片从本地缓存读取
    let manager = IasManager::with_http(config(&base, dir.path()), None);
    assert!(manager.init().await);
    assert!(manager.is_ad_ready(0, 1, 0).await);
    assert!(std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().starts_with("IAS_")));

    manager.shutdown().await;
    server.abort();
}
