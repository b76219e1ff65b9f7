//! 服务器状态表
//!
//! `StateStore` 只由状态 actor 持有和修改，因此不需要任何锁。
//! 其他组件只能看到 [`ServerState`] 的不可变快照。

use crate::state::events::{ClientInfo, ConnectionId, ServerEvent};
use crate::transfer::ByteRange;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// 吞吐量采样窗口
pub const SPEED_WINDOW: Duration = Duration::from_millis(500);

/// 一次进行中的 HTTP 请求
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub client: ClientInfo,
    pub path: String,
    pub connected_at: Instant,
    pub file_name: Option<String>,
    pub file_size: u64,
    pub range: Option<ByteRange>,
    /// 已发送的累计字节数
    pub sent: u64,
    /// 字节/秒，按采样窗口计算
    pub speed: f64,
    pub updated_at: Instant,
    window_start: Instant,
    window_bytes: u64,
}

impl Connection {
    fn new(id: ConnectionId, client: ClientInfo, path: String, at: Instant) -> Self {
        Self {
            id,
            client,
            path,
            connected_at: at,
            file_name: None,
            file_size: 0,
            range: None,
            sent: 0,
            speed: 0.0,
            updated_at: at,
            window_start: at,
            window_bytes: 0,
        }
    }

    /// 本次响应应发送的字节数
    pub fn expected(&self) -> u64 {
        self.range.map_or(0, |r| r.len())
    }

    /// 进度 0.0..=1.0，没有下载时为 `None`
    pub fn progress(&self) -> Option<f64> {
        self.file_name.as_ref()?;
        let expected = self.expected();
        if expected == 0 {
            return Some(1.0);
        }
        Some((self.sent as f64 / expected as f64).min(1.0))
    }

    fn record_progress(&mut self, bytes: u64, at: Instant) {
        self.sent += bytes;
        self.window_bytes += bytes;
        self.updated_at = at;

        let elapsed = at.saturating_duration_since(self.window_start);
        if elapsed >= SPEED_WINDOW {
            self.speed = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_start = at;
            self.window_bytes = 0;
        }
    }
}

/// 服务器状态快照
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    pub root: PathBuf,
    pub base_url: Option<String>,
    pub connections: HashMap<ConnectionId, Connection>,
}

impl ServerState {
    /// 按连接建立时间排序
    pub fn connections_by_age(&self) -> Vec<&Connection> {
        let mut conns: Vec<_> = self.connections.values().collect();
        conns.sort_by_key(|c| c.connected_at);
        conns
    }

    /// 所有连接的总吞吐量（字节/秒）
    pub fn total_speed(&self) -> f64 {
        self.connections.values().map(|c| c.speed).sum()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("{event} for unknown connection {id}")]
    UnknownConnection {
        id: ConnectionId,
        event: &'static str,
    },

    #[error("connection {0} already exists")]
    DuplicateConnection(ConnectionId),
}

pub struct StateStore {
    state: ServerState,
}

impl StateStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            state: ServerState {
                root,
                ..ServerState::default()
            },
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// 应用一个事件
    ///
    /// 未知连接的事件（连接关闭后迟到的进度等）返回错误，由调用方记录后丢弃。
    pub fn apply(&mut self, event: ServerEvent) -> Result<(), StateError> {
        let name = event.name();
        let unknown = |id: ConnectionId| StateError::UnknownConnection { id, event: name };

        match event {
            ServerEvent::ConnectionOpened {
                id,
                client,
                path,
                at,
            } => {
                if self.state.connections.contains_key(&id) {
                    return Err(StateError::DuplicateConnection(id));
                }
                self.state
                    .connections
                    .insert(id.clone(), Connection::new(id, client, path, at));
            }
            ServerEvent::ConnectionClosed { id, .. } => {
                self.state.connections.remove(&id).ok_or_else(|| unknown(id))?;
            }
            ServerEvent::DownloadStarted {
                id,
                file_name,
                file_size,
                range,
                at,
            } => {
                let Some(conn) = self.state.connections.get_mut(&id) else {
                    return Err(unknown(id));
                };
                conn.file_name = Some(file_name);
                conn.file_size = file_size;
                conn.range = range;
                conn.sent = 0;
                conn.speed = 0.0;
                conn.updated_at = at;
                conn.window_start = at;
                conn.window_bytes = 0;
            }
            ServerEvent::TransferProgressed { id, bytes, at } => {
                let Some(conn) = self.state.connections.get_mut(&id) else {
                    return Err(unknown(id));
                };
                conn.record_progress(bytes, at);
            }
            ServerEvent::AddressUpdated { base_url } => {
                self.state.base_url = Some(base_url);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn opened(id: &ConnectionId, at: Instant) -> ServerEvent {
        ServerEvent::ConnectionOpened {
            id: id.clone(),
            client: ClientInfo::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), None),
            path: "/movie.mkv".to_string(),
            at,
        }
    }

    fn started(id: &ConnectionId, size: u64, at: Instant) -> ServerEvent {
        ServerEvent::DownloadStarted {
            id: id.clone(),
            file_name: "movie.mkv".to_string(),
            file_size: size,
            range: ByteRange::full(size),
            at,
        }
    }

    fn progressed(id: &ConnectionId, bytes: u64, at: Instant) -> ServerEvent {
        ServerEvent::TransferProgressed {
            id: id.clone(),
            bytes,
            at,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut store = StateStore::new(PathBuf::from("/srv"));
        let id = ConnectionId::new();
        let t0 = Instant::now();

        store.apply(opened(&id, t0)).unwrap();
        store.apply(started(&id, 1000, t0)).unwrap();
        store.apply(progressed(&id, 400, t0)).unwrap();
        store.apply(progressed(&id, 600, t0)).unwrap();

        let conn = &store.state().connections[&id];
        assert_eq!(conn.sent, 1000);
        assert_eq!(conn.file_name.as_deref(), Some("movie.mkv"));
        assert_eq!(conn.progress(), Some(1.0));

        store
            .apply(ServerEvent::ConnectionClosed {
                id: id.clone(),
                at: t0,
            })
            .unwrap();
        assert!(store.state().connections.is_empty());
    }

    #[test]
    fn test_out_of_order_events_are_rejected_not_panicking() {
        let mut store = StateStore::new(PathBuf::new());
        let id = ConnectionId::new();
        let t0 = Instant::now();

        assert_eq!(
            store.apply(progressed(&id, 10, t0)),
            Err(StateError::UnknownConnection {
                id: id.clone(),
                event: "file_progress"
            })
        );
        assert!(store.apply(started(&id, 10, t0)).is_err());
        assert!(
            store
                .apply(ServerEvent::ConnectionClosed {
                    id: id.clone(),
                    at: t0
                })
                .is_err()
        );

        // 关闭后迟到的进度事件不会让连接复活
        store.apply(opened(&id, t0)).unwrap();
        store
            .apply(ServerEvent::ConnectionClosed {
                id: id.clone(),
                at: t0,
            })
            .unwrap();
        assert!(store.apply(progressed(&id, 10, t0)).is_err());
        assert!(store.state().connections.is_empty());
    }

    #[test]
    fn test_duplicate_open_is_rejected() {
        let mut store = StateStore::new(PathBuf::new());
        let id = ConnectionId::new();
        let t0 = Instant::now();

        store.apply(opened(&id, t0)).unwrap();
        assert_eq!(
            store.apply(opened(&id, t0)),
            Err(StateError::DuplicateConnection(id))
        );
    }

    #[test]
    fn test_speed_is_computed_per_window() {
        let mut store = StateStore::new(PathBuf::new());
        let id = ConnectionId::new();
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        store.apply(opened(&id, t0)).unwrap();
        store.apply(started(&id, 10_000, t0)).unwrap();

        // 窗口未满，速度保持为 0
        store.apply(progressed(&id, 100, at(100))).unwrap();
        assert!(store.state().connections[&id].speed.abs() < f64::EPSILON);

        // 500ms 内共 500 字节
        store.apply(progressed(&id, 400, at(500))).unwrap();
        assert!((store.state().connections[&id].speed - 1000.0).abs() < 1e-6);

        // 下一个窗口未满时保留上次的值
        store.apply(progressed(&id, 250, at(750))).unwrap();
        assert!((store.state().connections[&id].speed - 1000.0).abs() < 1e-6);

        store.apply(progressed(&id, 100, at(1000))).unwrap();
        assert!((store.state().connections[&id].speed - 700.0).abs() < 1e-6);
        assert_eq!(store.state().connections[&id].sent, 850);
        assert_eq!(store.state().connections[&id].updated_at, at(1000));
    }

    #[test]
    fn test_download_started_resets_counters() {
        let mut store = StateStore::new(PathBuf::new());
        let id = ConnectionId::new();
        let t0 = Instant::now();

        store.apply(opened(&id, t0)).unwrap();
        store.apply(started(&id, 100, t0)).unwrap();
        store.apply(progressed(&id, 50, t0 + SPEED_WINDOW)).unwrap();
        store.apply(started(&id, 200, t0 + SPEED_WINDOW)).unwrap();

        let conn = &store.state().connections[&id];
        assert_eq!(conn.sent, 0);
        assert_eq!(conn.file_size, 200);
        assert_eq!(conn.expected(), 200);
        assert!(conn.speed.abs() < f64::EPSILON);
    }

    #[test]
    fn test_address_updated() {
        let mut store = StateStore::new(PathBuf::new());
        store
            .apply(ServerEvent::AddressUpdated {
                base_url: "http://192.168.1.2:8080".to_string(),
            })
            .unwrap();
        assert_eq!(
            store.state().base_url.as_deref(),
            Some("http://192.168.1.2:8080")
        );
    }
}
