//! 文件传输模块
//!
//! 包含:
//! - HTTP `Range` 头解析
//! - 分块流式发送与进度报告

pub mod range;
pub mod streamer;

pub use range::{ByteRange, RangeError, parse_range};
pub use streamer::{
    BodySink, DEFAULT_CHUNK_SIZE, StreamOutcome, Transfer, TransferStreamer, body_channel,
};
