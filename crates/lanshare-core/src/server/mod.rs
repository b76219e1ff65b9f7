//! HTTP 文件服务器
//!
//! - **handler**: 单个请求的状态机
//! - **negotiate**: 目录列表风格选择
//! - **error**: 错误到 HTTP 状态码的映射
//! - **addr**: 对外公布的访问地址

pub mod addr;
pub mod error;
pub mod handler;
pub mod negotiate;

pub use error::ServeError;
pub use handler::{AppContext, handle_request};
pub use negotiate::{ListingPolicy, ListingStyle, choose_listing};

use crate::config::ServerConfig;
use crate::fs::ServedRoot;
use crate::state::{EventBus, ServerEvent};
use crate::transfer::TransferStreamer;
use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 构建路由：所有路径都交给同一个处理函数
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new().fallback(handle_request).with_state(ctx)
}

/// 已绑定端口、尚未开始服务的文件服务器
pub struct FileServer {
    listener: TcpListener,
    ctx: Arc<AppContext>,
    base_url: String,
}

impl FileServer {
    /// 绑定监听地址
    pub async fn bind(config: &ServerConfig, root: ServedRoot, bus: EventBus) -> io::Result<Self> {
        let listener = TcpListener::bind((config.bind, config.port)).await?;
        let local = listener.local_addr()?;
        let base_url = addr::base_url(local.ip(), local.port());

        let ctx = Arc::new(AppContext {
            root,
            bus,
            streamer: TransferStreamer::new(config.chunk_size),
            listing: config.listing,
            show_hidden: config.show_hidden,
        });

        Ok(Self {
            listener,
            ctx,
            base_url,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 开始服务，直到 `shutdown` 被取消
    ///
    /// 取消后不再接受新连接，已有请求处理完毕后返回。
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        self.ctx
            .bus
            .emit(ServerEvent::AddressUpdated {
                base_url: self.base_url.clone(),
            })
            .await;

        info!(
            root = %self.ctx.root.path().display(),
            url = %self.base_url,
            "File server listening"
        );

        let app = router(self.ctx);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

        info!("File server stopped");
        Ok(())
    }
}
