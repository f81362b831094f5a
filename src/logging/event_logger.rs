// src/logging/event_logger.rs

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::{self, Duration};
use tracing_appender::rolling;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::MakeWriter;

use crate::logging::ad_event::{AdEvent, AdEventKind};

enum LogMessage {
    Entry(AdEvent),
    Flush(oneshot::Sender<()>),
}

/// 广告事件日志管理器
/// 展示、点击和错误事件按类型分流到不同的日志文件，批量异步写入。
pub struct EventLogger {
    sender: Sender<LogMessage>,
}

impl EventLogger {
    /// 创建一个新的 EventLogger
    ///
    /// - `log_dir`: 日志文件存放目录
    /// - `file_prefix`: 文件前缀，例如 "ias"（最终文件名形如 ias_click.json 等）
    /// - `buffer_size`: mpsc 通道缓冲区大小
    /// - `batch_size`: 每种事件批量写入的条数
    /// - `flush_interval`: 定时刷新日志的时间间隔（毫秒）
    /// - `retention_hours`: 日志保留时长，0 表示不清理
    pub fn new(
        log_dir: &str,
        file_prefix: &str,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: u64,
        retention_hours: u64,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let mut log_files = HashMap::new();
        for kind in AdEventKind::ALL {
            let file_name = format!("{}_{}.json", file_prefix, kind.as_str());
            let appender = rolling::hourly(log_dir, &file_name);
            log_files.insert(kind, Arc::new(appender));
        }
        tokio::spawn(Self::background_log_writer(
            log_files,
            receiver,
            batch_size.max(1),
            flush_interval.max(1),
        ));
        // 启动后台任务定期清理日志文件
        if retention_hours > 0 {
            let log_dir = PathBuf::from(log_dir);
            let file_prefix = format!("{}_", file_prefix);
            let retention = Duration::from_secs(retention_hours * 3600);
            tokio::spawn(async move {
                let mut hourly = time::interval(Duration::from_secs(3600));
                loop {
                    hourly.tick().await;
                    Self::cleanup_old_logs(&log_dir, &file_prefix, retention).await;
                }
            });
        }
        Arc::new(Self { sender })
    }

    /// 记录一条事件
    pub async fn log(&self, event: AdEvent) {
        if let Err(e) = self.sender.send(LogMessage::Entry(event)).await {
            tracing::warn!("Failed to send event log message: {}", e);
        }
    }

    /// 把缓冲区中的事件全部写盘
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(LogMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// 后台日志写入任务
    async fn background_log_writer(
        log_files: HashMap<AdEventKind, Arc<RollingFileAppender>>,
        mut receiver: Receiver<LogMessage>,
        batch_size: usize,
        flush_interval: u64,
    ) {
        // 每种事件独立的缓冲区
        let mut buffers: HashMap<AdEventKind, Vec<String>> = HashMap::new();
        let mut interval = time::interval(Duration::from_millis(flush_interval));
        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(LogMessage::Entry(event)) => {
                        let kind = event.kind;
                        let line = match serde_json::to_string(&event) {
                            Ok(line) => line,
                            Err(e) => {
                                tracing::warn!("Failed to encode event: {}", e);
                                continue;
                            }
                        };
                        let buffer = buffers.entry(kind).or_default();
                        buffer.push(line);
                        if buffer.len() >= batch_size {
                            if let Some(appender) = log_files.get(&kind) {
                                Self::write_logs_to_disk(appender.clone(), buffer).await;
                            }
                            buffer.clear();
                        }
                    }
                    Some(LogMessage::Flush(ack)) => {
                        Self::flush_all(&log_files, &mut buffers).await;
                        let _ = ack.send(());
                    }
                    None => {
                        Self::flush_all(&log_files, &mut buffers).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    Self::flush_all(&log_files, &mut buffers).await;
                }
            }
        }
    }

    async fn flush_all(
        log_files: &HashMap<AdEventKind, Arc<RollingFileAppender>>,
        buffers: &mut HashMap<AdEventKind, Vec<String>>,
    ) {
        for (kind, buffer) in buffers.iter_mut() {
            if !buffer.is_empty() {
                if let Some(appender) = log_files.get(kind) {
                    Self::write_logs_to_disk(appender.clone(), buffer).await;
                }
                buffer.clear();
            }
        }
    }

    async fn write_logs_to_disk(file: Arc<RollingFileAppender>, buffer: &[String]) {
        let content = buffer.join("\n") + "\n";
        let result = task::spawn_blocking(move || {
            let mut writer = file.make_writer();
            writer.write_all(content.as_bytes())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to write event logs: {}", e),
            Err(e) => tracing::warn!("Event log writer task failed: {}", e),
        }
    }

    /// 删除超过保留时长的事件日志，只处理本 logger 前缀的文件
    async fn cleanup_old_logs(log_dir: &Path, file_prefix: &str, retention: Duration) {
        let mut entries = match tokio::fs::read_dir(log_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read log directory {:?}: {}", log_dir, e);
                return;
            }
        };
        let now = SystemTime::now();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(file_prefix) {
                continue;
            }
            let expired = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => now.duration_since(modified).unwrap_or_default() > retention,
                Err(_) => false,
            };
            if !expired {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!("Deleted expired event log {:?}", path),
                Err(e) => tracing::warn!("Failed to delete event log {:?}: {}", path, e),
            }
        }
    }
}
