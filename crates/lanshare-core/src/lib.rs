//! LanShare Core Library
//!
//! 局域网文件共享服务器的核心实现库
//!
//! # 模块
//!
//! - **fs**: 安全路径解析、目录列表
//! - **transfer**: `Range` 解析、分块流式发送
//! - **state**: 事件总线与单写者状态 actor
//! - **server**: axum HTTP 服务器与请求处理
//! - **config**: 配置文件与默认值
//! - **logging**: UI 共用的日志条目
//!
//! # 使用示例
//!
//! ```ignore
//! use lanshare_core::{FileServer, ServedRoot, ServerConfig, spawn_state_actor};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ServerConfig::load();
//! let root = ServedRoot::new(&config.root)?;
//!
//! // 1. 启动状态 actor
//! let (bus, view, actor) = spawn_state_actor(config.event_capacity, root.path().to_path_buf());
//!
//! // 2. 绑定并运行服务器
//! let server = FileServer::bind(&config, root, bus).await?;
//! let shutdown = CancellationToken::new();
//! tokio::spawn(server.run(shutdown.clone()));
//!
//! // 3. 读取状态快照
//! let snapshot = view.snapshot();
//! println!("{} active connections", snapshot.connections.len());
//! ```

pub mod config;
pub mod fs;
pub mod logging;
pub mod server;
pub mod state;
pub mod transfer;

pub use config::{ConfigError, ServerConfig};
pub use fs::{PathError, ServedRoot, resolve_path};
pub use logging::{LogEntry, LogLevel};
pub use server::{FileServer, ListingPolicy, ServeError};
pub use state::{
    ClientInfo, Connection, ConnectionId, EventBus, ServerEvent, ServerState, StateView,
    spawn_state_actor,
};
pub use transfer::{ByteRange, RangeError, TransferStreamer, parse_range};
