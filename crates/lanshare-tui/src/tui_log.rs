//! TUI 日志层
//!
//! 自定义 tracing Layer，将日志发送到 TUI 的日志面板。
//! 请求内产生的日志会带上所在 span 的 `req_id`。

use crate::app::AppEvent;
use lanshare_core::{LogEntry, LogLevel};
use std::fmt;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// span 上记录的请求 ID
struct RequestId(String);

/// 发送日志到 TUI 的 Layer
pub struct TuiLogLayer {
    tx: mpsc::Sender<AppEvent>,
}

impl TuiLogLayer {
    pub fn new(tx: mpsc::Sender<AppEvent>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for TuiLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor(None);
        attrs.record(&mut visitor);

        if let Some(req_id) = visitor.0
            && let Some(span) = ctx.span(id)
        {
            span.extensions_mut().insert(RequestId(req_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        // 提取日志消息和其余字段
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.finish();

        // 如果消息为空，使用目标名称
        if message.is_empty() {
            message = metadata.target().to_string();
        }

        let mut entry =
            LogEntry::new(LogLevel::from(metadata.level()), message).with_target(metadata.target());

        let request_id = ctx.event_scope(event).and_then(|scope| {
            scope
                .from_root()
                .find_map(|span| span.extensions().get::<RequestId>().map(|r| r.0.clone()))
        });
        if let Some(id) = request_id {
            entry = entry.with_request_id(id);
        }

        // 尝试发送到 TUI（非阻塞，面板跟不上时丢弃）
        let _ = self.tx.try_send(AppEvent::Log(entry));
    }
}

struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "req_id" {
            self.0 = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "req_id" {
            self.0 = Some(value.to_string());
        }
    }
}

/// 访问者，用于提取事件中的消息字段
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, info_span, warn};
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(f: impl FnOnce()) -> Vec<LogEntry> {
        let (tx, mut rx) = mpsc::channel(16);
        let subscriber = tracing_subscriber::registry().with(TuiLogLayer::new(tx));
        tracing::subscriber::with_default(subscriber, f);

        let mut entries = Vec::new();
        while let Ok(AppEvent::Log(entry)) = rx.try_recv() {
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_request_id_from_span() {
        let entries = capture(|| {
            info!("outside");
            let span = info_span!("request", req_id = %"abc123");
            let _guard = span.enter();
            warn!(sent = 10, "Download aborted");
        });

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request_id, None);
        assert_eq!(entries[1].request_id.as_deref(), Some("abc123"));
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(entries[1].message, "Download aborted sent=10");
    }
}
