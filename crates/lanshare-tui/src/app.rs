//! Application state

use lanshare_core::{Connection, LogEntry, LogLevel, ServerState, StateView};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 日志面板最多保留的条目数
const MAX_LOGS: usize = 500;

/// 后台发往 UI 的事件
#[derive(Debug)]
pub enum AppEvent {
    Log(LogEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Connections,
    Log,
}

pub struct App {
    pub tab: Tab,
    /// 本机名称，显示在标题栏
    pub host_name: String,
    pub state: Arc<ServerState>,
    pub selected: usize,
    pub logs: VecDeque<LogEntry>,
    pub event_tx: mpsc::Sender<AppEvent>,
    event_rx: mpsc::Receiver<AppEvent>,
    view: StateView,
}

impl App {
    pub fn new(view: StateView) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let mut app = Self {
            tab: Tab::Connections,
            host_name: local_host_name(),
            state: view.snapshot(),
            selected: 0,
            logs: VecDeque::new(),
            event_tx,
            event_rx,
            view,
        };
        app.add_log(LogLevel::Info, "LanShare started, press 'q' to quit");
        app
    }

    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.push_log(LogEntry::new(level, message));
    }

    fn push_log(&mut self, entry: LogEntry) {
        if self.logs.len() == MAX_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    /// 按连接建立时间排序的当前连接
    pub fn connections(&self) -> Vec<&Connection> {
        self.state.connections_by_age()
    }

    pub fn next_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Connections => Tab::Log,
            Tab::Log => Tab::Connections,
        };
    }

    pub fn next_connection(&mut self) {
        let len = self.state.connections.len();
        if len > 0 {
            self.selected = (self.selected + 1) % len;
        }
    }

    pub fn previous_connection(&mut self) {
        let len = self.state.connections.len();
        if len > 0 {
            self.selected = self.selected.checked_sub(1).unwrap_or(len - 1);
        }
    }

    /// 拉取最新快照和日志
    pub fn tick(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                AppEvent::Log(entry) => self.push_log(entry),
            }
        }

        if self.view.has_changed() {
            self.state = self.view.snapshot_and_mark_seen();
            let len = self.state.connections.len();
            if self.selected >= len {
                self.selected = len.saturating_sub(1);
            }
        }
    }
}

fn local_host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
