use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{serve, Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::info;

/// 模拟的广告：(slot id, 包名)
const MOCK_ADVERTS: &[(&str, &str)] = &[
    ("1a", "com.pickle.golf"),
    ("1b", "com.pickle.chess"),
    ("1c", "com.pickle.darts"),
    ("2a", "com.pickle.snooker"),
    ("2b", "com.pickle.golf"),
];

/// PNG 文件头，后面拼接广告位 ID 作为假的图片内容
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

struct MockFeed {
    base_url: String,
    update_time: i64,
}

/// 模拟 manifest 接口：GET /ad/{file}，例如 /ad/1.json
async fn handle_manifest(State(feed): State<Arc<MockFeed>>, Path(file): Path<String>) -> Response {
    info!("Mock feed received manifest request: {}", file);

    // 模拟网络延迟（10 ~ 50 毫秒）
    let delay_ms = rand::thread_rng().gen_range(10..50);
    sleep(Duration::from_millis(delay_ms)).await;

    if file != "1.json" {
        return (StatusCode::OK, "There was an error").into_response();
    }

    let slots: Vec<Value> = MOCK_ADVERTS
        .iter()
        .map(|(slot_id, package)| {
            json!({
                "slotid": slot_id,
                "updatetime": feed.update_time,
                "active": true,
                "adurl": format!("https://play.google.com/store/apps/details?id={}", package),
                "imgurl": format!("{}/uploads/adverts/{}.png", feed.base_url, slot_id),
            })
        })
        .collect();

    Json(json!({ "slots": slots, "containers": [] })).into_response()
}

/// 模拟图片接口：GET /uploads/adverts/{name}
async fn handle_image(Path(name): Path<String>) -> Response {
    let slot_id = name.split('.').next().unwrap_or_default();
    if !MOCK_ADVERTS.iter().any(|(id, _)| *id == slot_id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let mut body = PNG_MAGIC.to_vec();
    body.extend_from_slice(slot_id.as_bytes());
    ([(header::CONTENT_TYPE, "image/png")], body).into_response()
}

/// mock 服务的路由，`base_url` 用于拼接图片地址
pub fn mock_router(base_url: &str, update_time: i64) -> Router {
    let feed = Arc::new(MockFeed {
        base_url: base_url.trim_end_matches('/').to_string(),
        update_time,
    });
    Router::new()
        .route("/ad/{file}", get(handle_manifest))
        .route("/uploads/adverts/{name}", get(handle_image))
        .with_state(feed)
}

/// 启动 Mock manifest 服务，端口为 0 时由系统分配
/// 返回实际监听地址以及服务任务句柄
pub async fn spawn_mock_feed(port: u16) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let addr = listener.local_addr()?;
    let app = mock_router(&format!("http://{}", addr), chrono::Utc::now().timestamp());
    info!("Mock feed running at http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, app).await {
            tracing::error!("Mock feed server stopped: {}", e);
        }
    });
    Ok((addr, handle))
}
