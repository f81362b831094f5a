// src/main.rs

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use rust_ias::logging::event_logger::EventLogger;
use rust_ias::manifest::parser::Platform;
use rust_ias::mock_feed;
use rust_ias::model::policy::{InstalledApps, PreloadPolicy};
use rust_ias::{IasConfig, IasEvent, IasManager};

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "In-app advert rotation host")]
struct CliArgs {
    /// 逗号分隔的 manifest 地址，下标即文件 ID
    #[arg(long, default_value = "")]
    manifest_urls: String,
    #[arg(long, default_value = "ias_cache")]
    cache_dir: PathBuf,
    #[arg(long, default_value = "ias_state")]
    state_dir: PathBuf,
    #[arg(long, default_value = "com.example.GameNameHere")]
    bundle_id: String,
    #[arg(long, default_value = "android")]
    platform: Platform,
    /// 启动进程内的 mock manifest 服务
    #[arg(long)]
    mock_port: Option<u16>,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,
    /// 逗号分隔的已安装应用包名
    #[arg(long, default_value = "")]
    installed_apps: String,
    /// 每个广告位的预加载偏移，例如 "1:1,2:0"
    #[arg(long, value_parser = PreloadPolicy::parse, default_value = "")]
    preload: PreloadPolicy,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // 初始化全局 tracing 日志
    let log_file = rolling::hourly(&args.log_dir, "ias_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");

    let mut config = IasConfig::from_args(&args.manifest_urls);
    config.cache_dir = args.cache_dir;
    config.state_dir = args.state_dir;
    config.bundle_id = args.bundle_id;
    config.platform = args.platform;
    config.installed_apps = InstalledApps::from_package_list(&args.installed_apps);
    config.preload = args.preload;

    // 启动 Mock manifest 服务，未指定地址时使用它
    let mock_server = match args.mock_port {
        Some(port) => match mock_feed::spawn_mock_feed(port).await {
            Ok((addr, handle)) => {
                if config.manifest_urls.is_empty() {
                    config.manifest_urls.push(format!("http://{}/ad/1.json", addr));
                }
                Some(handle)
            }
            Err(e) => {
                error!("Unable to start mock feed on port {}: {}", port, e);
                None
            }
        },
        None => None,
    };

    if config.manifest_urls.is_empty() {
        eprintln!("No manifest URL given; use --manifest-urls or --mock-port");
        return;
    }
    info!(urls = ?config.manifest_urls, "IAS host starting");

    // 事件日志：展示、点击、错误分文件记录
    let event_logger = EventLogger::new(&args.log_dir, "ias", 1000, 100, 1000, 24 * 7);
    let manager = IasManager::with_http(config, Some(event_logger));

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                IasEvent::ImageDownloaded(key) => info!(ad = %key, "advert image ready"),
                IasEvent::ForceChangeWanted(slot) => info!(?slot, "advert change requested"),
            }
        }
    });

    let restored = manager.init().await;
    info!(restored, "IAS initialised");

    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                manager.tick().await;
                if let Some(package) = manager.get_ad_package_name(0, 1, 0).await {
                    if manager.is_ad_ready(0, 1, 0).await {
                        manager.record_impression(&package, false).await;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutting down gracefully...");
                break;
            }
        }
    }

    manager.shutdown().await;
    if let Some(handle) = mock_server {
        handle.abort();
    }
    info!("IAS host shut down.");
}
