//! 目录列表风格协商

use serde::{Deserialize, Serialize};

/// 配置的列表策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingPolicy {
    /// 按 `Accept` 头决定
    #[default]
    Negotiate,
    /// 总是输出完整页面
    Pretty,
    /// 总是输出简单列表
    Bare,
}

/// 实际使用的渲染方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    Pretty,
    Bare,
}

/// 根据策略和请求的 `Accept` 头选择渲染方式
pub fn choose_listing(policy: ListingPolicy, accept: Option<&str>) -> ListingStyle {
    match policy {
        ListingPolicy::Pretty => ListingStyle::Pretty,
        ListingPolicy::Bare => ListingStyle::Bare,
        ListingPolicy::Negotiate => {
            if accept.is_some_and(accepts_html) {
                ListingStyle::Pretty
            } else {
                ListingStyle::Bare
            }
        }
    }
}

/// `Accept` 中是否有 `text/html` 且 q 不为 0
fn accepts_html(accept: &str) -> bool {
    accept.split(',').any(|item| {
        let mut parts = item.split(';').map(str::trim);
        let media = parts.next().unwrap_or_default();
        if !media.eq_ignore_ascii_case("text/html") {
            return false;
        }
        !parts.any(|p| {
            p.strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        })
    })
}
