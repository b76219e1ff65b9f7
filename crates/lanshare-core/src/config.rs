//! 服务器配置
//!
//! 配置来源优先级（高到低）：命令行参数 → 配置文件 → 默认值。
//! 配置文件默认位于 `<config_dir>/lanshare/config.toml`。

use crate::server::ListingPolicy;
use crate::transfer::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("served root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// 服务器设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 共享目录
    pub root: PathBuf,
    /// 监听地址
    pub bind: IpAddr,
    /// 监听端口，0 表示由系统分配
    pub port: u16,
    /// 每次读取的块大小（字节）
    pub chunk_size: usize,
    /// 事件通道容量
    pub event_capacity: usize,
    /// 目录列表风格
    pub listing: ListingPolicy,
    /// 是否列出以 `.` 开头的条目
    pub show_hidden: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            chunk_size: DEFAULT_CHUNK_SIZE,
            event_capacity: 256,
            listing: ListingPolicy::default(),
            show_hidden: false,
        }
    }
}

impl ServerConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanshare")
            .join("config.toml")
    }

    /// 加载默认位置的配置（文件不存在或无效时使用默认值）
    pub fn load() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    /// 从指定文件加载，任何错误都返回给调用方
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk_size"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        if !self.root.is_dir() {
            return Err(ConfigError::NotADirectory(self.root.clone()));
        }
        Ok(())
    }
}
