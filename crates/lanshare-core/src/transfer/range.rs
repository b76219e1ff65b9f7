//! HTTP `Range` 请求头解析
//!
//! 只支持单区间语法 `bytes=<start>-<end>`，两端均可省略（但不能同时省略）。
//! 多区间请求（`bytes=0-10,20-30`）视为不支持的语法。

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bytes=(\d*)-(\d*)$").unwrap());

/// 闭区间字节范围 `[start, end]`
///
/// 构造后始终满足 `start <= end < size`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// 覆盖整个资源的区间，空资源返回 `None`
    pub fn full(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// 区间包含的字节数
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` 响应头的值: `bytes <start>-<end>/<size>`
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// 格式化为请求头形式 `bytes=<start>-<end>`
impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range header: {0:?}")]
    Malformed(String),

    #[error("range {header:?} not satisfiable for size {size}")]
    Unsatisfiable { header: String, size: u64 },
}

/// 解析 `Range` 请求头
///
/// - 空字符串返回 `Ok(None)`，表示返回完整资源
/// - `bytes=A-` 表示从 A 到末尾
/// - `bytes=-N` 表示最后 N 个字节
///
/// 越界或反向的区间直接报错，不做截断。
pub fn parse_range(header: &str, size: u64) -> Result<Option<ByteRange>, RangeError> {
    let header = header.trim();
    if header.is_empty() {
        return Ok(None);
    }

    let malformed = || RangeError::Malformed(header.to_string());
    let unsatisfiable = || RangeError::Unsatisfiable {
        header: header.to_string(),
        size,
    };

    let caps = RANGE_PATTERN.captures(header).ok_or_else(malformed)?;
    let first = caps.get(1).map_or("", |m| m.as_str());
    let second = caps.get(2).map_or("", |m| m.as_str());

    let number = |digits: &str| digits.parse::<u64>().map_err(|_| malformed());

    let (start, end) = match (first.is_empty(), second.is_empty()) {
        (true, true) => return Err(malformed()),
        // bytes=-N
        (true, false) => {
            let suffix = number(second)?;
            if suffix == 0 {
                return Err(unsatisfiable());
            }
            let start = size.checked_sub(suffix).ok_or_else(unsatisfiable)?;
            let end = size.checked_sub(1).ok_or_else(unsatisfiable)?;
            (start, end)
        }
        // bytes=A-
        (false, true) => {
            let end = size.checked_sub(1).ok_or_else(unsatisfiable)?;
            (number(first)?, end)
        }
        (false, false) => (number(first)?, number(second)?),
    };

    if start > end || end >= size {
        return Err(unsatisfiable());
    }

    Ok(Some(ByteRange { start, end }))
}
