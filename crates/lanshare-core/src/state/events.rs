//! 服务器事件与事件总线
//!
//! 请求处理任务只产生事件，从不直接修改状态。事件通过有界 MPSC 通道
//! 送到唯一的状态 actor（见 [`crate::state::actor`]）。

use crate::transfer::ByteRange;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 连接 ID，同时作为请求的日志关联 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 客户端身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: IpAddr,
    /// 主机名，无法解析时为 IP 字符串
    pub host: String,
    pub user_agent: Option<String>,
}

/// 反向解析的最长等待时间
pub const HOSTNAME_LOOKUP_TIMEOUT: Duration = Duration::from_millis(300);

impl ClientInfo {
    /// 不做解析，主机名即 IP 字符串
    pub fn new(ip: IpAddr, user_agent: Option<String>) -> Self {
        Self {
            ip,
            host: ip.to_string(),
            user_agent,
        }
    }

    /// 反向解析客户端主机名，失败或超时时退回 IP 字符串
    pub async fn resolve(ip: IpAddr, user_agent: Option<String>) -> Self {
        let mut client = Self::new(ip, user_agent);
        if let Some(host) = lookup_hostname(ip).await {
            client.host = host;
        }
        client
    }
}

async fn lookup_hostname(ip: IpAddr) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    match tokio::time::timeout(HOSTNAME_LOOKUP_TIMEOUT, lookup).await {
        Ok(Ok(Ok(name))) => normalize_hostname(&name, ip),
        Ok(Ok(Err(e))) => {
            tracing::debug!(%ip, error = %e, "Reverse lookup failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(%ip, error = %e, "Reverse lookup task failed");
            None
        }
        Err(_) => {
            tracing::debug!(%ip, "Reverse lookup timed out");
            None
        }
    }
}

/// 去掉末尾的 `.`；空名或数字形式的结果视为未解析
fn normalize_hostname(name: &str, ip: IpAddr) -> Option<String> {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok_and(|parsed| parsed == ip) {
        return None;
    }
    Some(name.to_string())
}

/// 服务器事件
///
/// 同一连接的事件顺序: `ConnectionOpened` → (`DownloadStarted` →
/// `TransferProgressed`*)? → `ConnectionClosed`
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ConnectionOpened {
        id: ConnectionId,
        client: ClientInfo,
        path: String,
        at: Instant,
    },
    ConnectionClosed {
        id: ConnectionId,
        at: Instant,
    },
    DownloadStarted {
        id: ConnectionId,
        file_name: String,
        file_size: u64,
        /// 空文件没有可发送的区间
        range: Option<ByteRange>,
        at: Instant,
    },
    /// `bytes` 是本块的字节数，不是累计值
    TransferProgressed {
        id: ConnectionId,
        bytes: u64,
        at: Instant,
    },
    AddressUpdated {
        base_url: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionOpened { .. } => "conn_open",
            ServerEvent::ConnectionClosed { .. } => "conn_close",
            ServerEvent::DownloadStarted { .. } => "download_start",
            ServerEvent::TransferProgressed { .. } => "file_progress",
            ServerEvent::AddressUpdated { .. } => "addr_updated",
        }
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            ServerEvent::ConnectionOpened { id, .. }
            | ServerEvent::ConnectionClosed { id, .. }
            | ServerEvent::DownloadStarted { id, .. }
            | ServerEvent::TransferProgressed { id, .. } => Some(id),
            ServerEvent::AddressUpdated { .. } => None,
        }
    }
}

/// 有界、有序的多生产者事件通道
///
/// 通道满时 `emit` 会等待，让生产者放慢而不是让队列无限增长。
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// 发送事件；消费者已退出（服务关闭中）时静默丢弃
    pub async fn emit(&self, event: ServerEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::debug!(event = e.0.name(), "State actor gone, event dropped");
        }
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<ServerEvent> {
        &self.tx
    }
}
