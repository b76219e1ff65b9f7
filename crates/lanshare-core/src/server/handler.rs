//! 请求处理
//!
//! 每个请求的处理流程：
//!
//! ```text
//! Start → 仅限 GET → 路径解析 → { 目录 | 文件 }
//!                              目录 → 列表页面
//!                              文件 → { 完整 | 区间 } → 流式发送 → 完成
//! ```
//!
//! 任何一步失败都进入 [`ServeError`]，写出对应的错误响应。
//! 无论结果如何，连接的 `ConnectionClosed` 都只发出一次。

use crate::fs::{PathError, ServedRoot, read_listing, render_bare, render_pretty};
use crate::server::error::ServeError;
use crate::server::negotiate::{ListingPolicy, ListingStyle, choose_listing};
use crate::state::{ClientInfo, ConnectionId, ConnectionTracker, EventBus};
use crate::transfer::{
    BodySink, ByteRange, StreamOutcome, Transfer, TransferStreamer, body_channel, parse_range,
};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use std::fs::Metadata;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// 所有请求共享的上下文
pub struct AppContext {
    pub root: ServedRoot,
    pub bus: EventBus,
    pub streamer: TransferStreamer,
    pub listing: ListingPolicy,
    pub show_hidden: bool,
}

/// 处理结果：直接返回的响应，或需要后台继续发送的文件
enum Served {
    Complete(Response),
    Streaming {
        response: Response,
        transfer: Transfer<File>,
        sink: BodySink,
    },
}

/// 所有路径共用的入口
pub async fn handle_request(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let id = ConnectionId::new();
    let span = info_span!("request", req_id = %id);
    serve(ctx, id, peer, method, uri, headers)
        .instrument(span)
        .await
}

async fn serve(
    ctx: Arc<AppContext>,
    id: ConnectionId,
    peer: SocketAddr,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client = ClientInfo::resolve(peer.ip(), user_agent).await;
    info!(
        %method,
        path = %path,
        client = %client.host,
        user_agent = client.user_agent.as_deref().unwrap_or("-"),
        "Request"
    );

    let tracker = ConnectionTracker::open(ctx.bus.clone(), id, client, path.clone()).await;

    match route(&ctx, &method, &path, &headers, &tracker).await {
        Ok(Served::Complete(response)) => {
            debug!(status = %response.status(), "Response sent");
            tracker.close().await;
            response
        }
        Ok(Served::Streaming {
            response,
            transfer,
            sink,
        }) => {
            tokio::spawn(
                async move {
                    match transfer.run(sink, &tracker).await {
                        StreamOutcome::Completed { sent } => info!(sent, "Download complete"),
                        StreamOutcome::ClientGone { sent } => {
                            info!(sent, "Download cancelled by client");
                        }
                        StreamOutcome::ReadFailed { sent, error } => {
                            error!(sent, error = %error, "Download aborted");
                        }
                    }
                    tracker.close().await;
                }
                .instrument(Span::current()),
            );
            response
        }
        Err(e) => {
            if e.status().is_server_error() {
                error!(error = %e, "Request failed");
            } else {
                info!(status = %e.status(), error = %e, "Request rejected");
            }
            tracker.close().await;
            e.into_response()
        }
    }
}

async fn route(
    ctx: &AppContext,
    method: &Method,
    raw_path: &str,
    headers: &HeaderMap,
    tracker: &ConnectionTracker,
) -> Result<Served, ServeError> {
    if method != Method::GET {
        return Err(ServeError::MethodNotAllowed(method.to_string()));
    }

    let request_path = urlencoding::decode(raw_path)
        .map_err(|_| ServeError::BadRequest("path is not valid UTF-8".into()))?;
    if request_path.contains('\0') {
        return Err(ServeError::BadRequest("path contains a NUL byte".into()));
    }
    let resolved = ctx.root.resolve(&request_path).await?;

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(PathError::from)?;

    if metadata.is_dir() {
        let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        let style = choose_listing(ctx.listing, accept);
        let display_path = listing_path(ctx.root.path(), &resolved);
        let page = list_directory(&resolved, &display_path, style, ctx.show_hidden).await?;
        return Ok(Served::Complete(page));
    }

    serve_file(ctx, &resolved, &metadata, headers, tracker).await
}

/// 目录相对服务根的 URL 路径，如 `/docs/`
fn listing_path(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(Path::new(""));
    let mut path = String::from("/");
    for component in relative.components() {
        path.push_str(&component.as_os_str().to_string_lossy());
        path.push('/');
    }
    path
}

async fn list_directory(
    dir: &Path,
    request_path: &str,
    style: ListingStyle,
    show_hidden: bool,
) -> Result<Response, ServeError> {
    let entries = read_listing(dir, request_path, show_hidden).await?;
    debug!(entries = entries.len(), ?style, "Directory listing");

    let page = match style {
        ListingStyle::Pretty => render_pretty(request_path, &entries, SystemTime::now()),
        ListingStyle::Bare => render_bare(&entries),
    };
    Ok(Html(page).into_response())
}

async fn serve_file(
    ctx: &AppContext,
    path: &Path,
    metadata: &Metadata,
    headers: &HeaderMap,
    tracker: &ConnectionTracker,
) -> Result<Served, ServeError> {
    let size = metadata.len();

    let range_header = match headers.get(header::RANGE) {
        Some(value) => value
            .to_str()
            .map_err(|_| ServeError::RangeNotSatisfiable { size })?,
        None => "",
    };
    let requested = parse_range(range_header, size).map_err(|e| {
        debug!(error = %e, "Rejecting range");
        ServeError::RangeNotSatisfiable { size }
    })?;

    let (status, range) = match requested {
        Some(range) => (StatusCode::PARTIAL_CONTENT, Some(range)),
        None => (StatusCode::OK, ByteRange::full(size)),
    };

    let file = File::open(path).await?;
    let transfer = ctx.streamer.open(file, range).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(file = %file_name, size, range = ?range, "Download started");
    tracker.download_started(file_name, size, range).await;

    let (sink, body) = body_channel();
    let response = file_response(status, size, range, metadata, body)?;

    Ok(Served::Streaming {
        response,
        transfer,
        sink,
    })
}

fn file_response(
    status: StatusCode,
    size: u64,
    range: Option<ByteRange>,
    metadata: &Metadata,
    body: Body,
) -> Result<Response, ServeError> {
    let mut builder = axum::http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, range.map_or(0, |r| r.len()))
        .header(header::ETAG, etag(metadata));

    if status == StatusCode::PARTIAL_CONTENT
        && let Some(range) = range
    {
        builder = builder.header(header::CONTENT_RANGE, range.content_range(size));
    }

    builder.body(body).map_err(|e| {
        warn!(error = %e, "Invalid response headers");
        ServeError::Io(std::io::Error::other(e))
    })
}

/// `"<mtime 秒数 hex>-<大小 hex>"`，大小或修改时间变化时随之变化
fn etag(metadata: &Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    format!("\"{:x}-{:x}\"", mtime, metadata.len())
}
