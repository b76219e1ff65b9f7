//! 分块流式传输
//!
//! 文件内容按块读出后送入响应体通道。每个块被 HTTP 层接收后才报告进度，
//! 所以 `TransferProgressed` 的累计值不会超过真正写出的字节数。

use crate::state::ConnectionTracker;
use crate::transfer::ByteRange;
use axum::body::{Body, Bytes};
use std::io::{self, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// 默认块大小 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// 响应体通道中最多缓存的块数
const BODY_BUFFER: usize = 2;

/// 响应体的发送端，`Err` 会让连接以错误结束而不是正常收尾
pub type BodySink = mpsc::Sender<io::Result<Bytes>>;

/// 创建响应体通道
pub fn body_channel() -> (BodySink, Body) {
    let (tx, rx) = mpsc::channel(BODY_BUFFER);
    (tx, Body::from_stream(ReceiverStream::new(rx)))
}

/// 一次传输的结束方式
#[derive(Debug)]
pub enum StreamOutcome {
    /// 区间内的所有字节都已写出
    Completed { sent: u64 },
    /// 读取失败或文件提前结束，已向客户端发出中止
    ReadFailed { sent: u64, error: io::Error },
    /// 客户端已断开
    ClientGone { sent: u64 },
}

impl StreamOutcome {
    pub fn sent(&self) -> u64 {
        match self {
            StreamOutcome::Completed { sent }
            | StreamOutcome::ReadFailed { sent, .. }
            | StreamOutcome::ClientGone { sent } => *sent,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferStreamer {
    chunk_size: usize,
}

impl Default for TransferStreamer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl TransferStreamer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// 定位到区间起点
    ///
    /// 在发送响应头之前调用，定位失败时还能返回 500。
    /// `range` 为 `None` 表示空文件，不会读取任何内容。
    pub async fn open<R>(&self, mut reader: R, range: Option<ByteRange>) -> io::Result<Transfer<R>>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        if let Some(range) = range
            && range.start > 0
        {
            reader.seek(SeekFrom::Start(range.start)).await?;
        }

        Ok(Transfer {
            reader,
            remaining: range.map_or(0, |r| r.len()),
            chunk_size: self.chunk_size,
        })
    }
}

/// 已定位、等待发送的传输
pub struct Transfer<R> {
    reader: R,
    remaining: u64,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> Transfer<R> {
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// 把剩余区间写入 `sink`，每个被接收的块报告一次进度
    pub async fn run(mut self, sink: BodySink, tracker: &ConnectionTracker) -> StreamOutcome {
        let mut sent = 0u64;

        while self.remaining > 0 {
            let want = usize::try_from(self.remaining)
                .unwrap_or(usize::MAX)
                .min(self.chunk_size);
            let mut buf = vec![0u8; want];

            let n = match self.reader.read(&mut buf).await {
                Ok(0) => {
                    let error = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file ended {} bytes early", self.remaining),
                    );
                    return abort(&sink, sent, error).await;
                }
                Ok(n) => n,
                Err(error) => return abort(&sink, sent, error).await,
            };
            buf.truncate(n);

            if sink.send(Ok(Bytes::from(buf))).await.is_err() {
                debug!(id = %tracker.id(), sent, "Client went away");
                return StreamOutcome::ClientGone { sent };
            }

            let n = n as u64;
            sent += n;
            self.remaining -= n;
            tracker.progressed(n).await;
        }

        StreamOutcome::Completed { sent }
    }
}

async fn abort(sink: &BodySink, sent: u64, error: io::Error) -> StreamOutcome {
    warn!(sent, error = %error, "Read failed mid-transfer, aborting response");
    // 客户端可能已经断开，忽略发送结果
    let _ = sink
        .send(Err(io::Error::new(error.kind(), error.to_string())))
        .await;
    StreamOutcome::ReadFailed { sent, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ClientInfo, ConnectionId, EventBus, ServerEvent};
    use std::io::Cursor;
    use std::net::{IpAddr, Ipv4Addr};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn tracker() -> (ConnectionTracker, mpsc::Receiver<ServerEvent>) {
        let (bus, rx) = EventBus::new(256);
        let client = ClientInfo::new(IpAddr::V4(Ipv4Addr::LOCALHOST), None);
        let tracker = ConnectionTracker::open(bus, ConnectionId::new(), client, "/f".into()).await;
        (tracker, rx)
    }

    fn progress_sum(rx: &mut mpsc::Receiver<ServerEvent>) -> u64 {
        let mut total = 0;
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::TransferProgressed { bytes, .. } = event {
                total += bytes;
            }
        }
        total
    }

    fn collect(rx: &mut mpsc::Receiver<io::Result<Bytes>>) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let mut failed = false;
        while let Ok(chunk) = rx.try_recv() {
            match chunk {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(_) => failed = true,
            }
        }
        (out, failed)
    }

    #[tokio::test]
    async fn test_full_transfer_reports_every_byte() {
        let content = data(10_000);
        let (tracker, mut events) = tracker().await;
        let (tx, mut rx) = mpsc::channel(64);

        let transfer = TransferStreamer::new(1024)
            .open(Cursor::new(content.clone()), ByteRange::full(10_000))
            .await
            .unwrap();
        let outcome = transfer.run(tx, &tracker).await;

        assert!(matches!(outcome, StreamOutcome::Completed { sent: 10_000 }));
        let (body, failed) = collect(&mut rx);
        assert!(!failed);
        assert_eq!(body, content);
        assert_eq!(progress_sum(&mut events), 10_000);
    }

    #[tokio::test]
    async fn test_partial_range_sends_requested_slice() {
        let content = data(5000);
        let (tracker, mut events) = tracker().await;
        let (tx, mut rx) = mpsc::channel(64);
        let range = ByteRange {
            start: 1000,
            end: 2999,
        };

        let transfer = TransferStreamer::new(300)
            .open(Cursor::new(content.clone()), Some(range))
            .await
            .unwrap();
        assert_eq!(transfer.remaining(), 2000);
        let outcome = transfer.run(tx, &tracker).await;

        assert_eq!(outcome.sent(), 2000);
        let (body, _) = collect(&mut rx);
        assert_eq!(body, &content[1000..3000]);
        assert_eq!(progress_sum(&mut events), 2000);
    }

    #[tokio::test]
    async fn test_empty_file_sends_nothing() {
        let (tracker, mut events) = tracker().await;
        let (tx, mut rx) = mpsc::channel(4);

        let transfer = TransferStreamer::default()
            .open(Cursor::new(Vec::new()), ByteRange::full(0))
            .await
            .unwrap();
        let outcome = transfer.run(tx, &tracker).await;

        assert!(matches!(outcome, StreamOutcome::Completed { sent: 0 }));
        assert!(collect(&mut rx).0.is_empty());
        assert_eq!(progress_sum(&mut events), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_transfer() {
        let (tracker, mut events) = tracker().await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let transfer = TransferStreamer::new(16)
            .open(Cursor::new(data(1024)), ByteRange::full(1024))
            .await
            .unwrap();
        let outcome = transfer.run(tx, &tracker).await;

        assert!(matches!(outcome, StreamOutcome::ClientGone { sent: 0 }));
        assert_eq!(progress_sum(&mut events), 0);
    }

    /// 文件在传输过程中被截断
    #[tokio::test]
    async fn test_early_eof_aborts_body() {
        let (tracker, mut events) = tracker().await;
        let (tx, mut rx) = mpsc::channel(64);

        // 声明 100 字节，实际只有 40
        let transfer = TransferStreamer::new(16)
            .open(Cursor::new(data(40)), ByteRange::full(100))
            .await
            .unwrap();
        let outcome = transfer.run(tx, &tracker).await;

        match outcome {
            StreamOutcome::ReadFailed { sent, error } => {
                assert_eq!(sent, 40);
                assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let (body, failed) = collect(&mut rx);
        assert_eq!(body.len(), 40);
        assert!(failed);
        assert_eq!(progress_sum(&mut events), 40);
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk on fire")))
        }
    }

    #[tokio::test]
    async fn test_read_error_aborts_body() {
        let (tracker, _events) = tracker().await;
        let (tx, mut rx) = mpsc::channel(4);

        let transfer = Transfer {
            reader: FailingReader,
            remaining: 10,
            chunk_size: 4,
        };
        let outcome = transfer.run(tx, &tracker).await;

        assert!(matches!(outcome, StreamOutcome::ReadFailed { sent: 0, .. }));
        assert!(collect(&mut rx).1);
    }
}
