//! 连接生命周期守卫
//!
//! 请求开始时发出 `ConnectionOpened`，结束时保证恰好发出一次
//! `ConnectionClosed`：正常路径调用 [`ConnectionTracker::close`]，
//! 其余任何退出路径（提前返回、panic、任务被丢弃）由 `Drop` 补发。

use crate::state::events::{ClientInfo, ConnectionId, EventBus, ServerEvent};
use crate::transfer::ByteRange;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;

pub struct ConnectionTracker {
    id: ConnectionId,
    bus: EventBus,
    closed: bool,
}

impl ConnectionTracker {
    /// 登记新连接
    pub async fn open(bus: EventBus, id: ConnectionId, client: ClientInfo, path: String) -> Self {
        bus.emit(ServerEvent::ConnectionOpened {
            id: id.clone(),
            client,
            path,
            at: Instant::now(),
        })
        .await;

        Self {
            id,
            bus,
            closed: false,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub async fn download_started(&self, file_name: String, file_size: u64, range: Option<ByteRange>) {
        self.bus
            .emit(ServerEvent::DownloadStarted {
                id: self.id.clone(),
                file_name,
                file_size,
                range,
                at: Instant::now(),
            })
            .await;
    }

    /// 报告一个已写出的数据块
    pub async fn progressed(&self, bytes: u64) {
        self.bus
            .emit(ServerEvent::TransferProgressed {
                id: self.id.clone(),
                bytes,
                at: Instant::now(),
            })
            .await;
    }

    /// 发出 `ConnectionClosed`
    ///
    /// 发送完成前被取消时不会标记为已关闭，由 `Drop` 补发。
    pub async fn close(mut self) {
        self.bus
            .emit(ServerEvent::ConnectionClosed {
                id: self.id.clone(),
                at: Instant::now(),
            })
            .await;
        self.closed = true;
    }
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let event = ServerEvent::ConnectionClosed {
            id: self.id.clone(),
            at: Instant::now(),
        };

        // Drop 中不能 await：先尝试直接入队，通道满时交给后台任务
        match self.bus.sender().try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let bus = self.bus.clone();
                    handle.spawn(async move { bus.emit(event).await });
                } else {
                    tracing::warn!(id = %self.id, "No runtime to deliver ConnectionClosed");
                }
            }
        }
    }
}
