//! 状态 actor
//!
//! 唯一的事件消费者，独占 [`StateStore`]。每批事件应用完成后，
//! 通过 `watch` 通道发布一份不可变快照供 UI 读取。

use crate::state::events::{EventBus, ServerEvent};
use crate::state::store::{ServerState, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// 一次最多合并处理的事件数，避免持续高负载时迟迟不发布快照
const MAX_BATCH: usize = 64;

/// 只读的状态视图（快照 + 变更通知）
#[derive(Debug, Clone)]
pub struct StateView {
    rx: watch::Receiver<Arc<ServerState>>,
}

impl StateView {
    /// 当前快照
    pub fn snapshot(&self) -> Arc<ServerState> {
        self.rx.borrow().clone()
    }

    /// 取出快照并标记为已读
    pub fn snapshot_and_mark_seen(&mut self) -> Arc<ServerState> {
        self.rx.borrow_and_update().clone()
    }

    /// 是否有未读的新快照
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// 等待下一份快照；actor 退出后返回 `None`
    pub async fn changed(&mut self) -> Option<Arc<ServerState>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

pub struct StateActor {
    store: StateStore,
    events: mpsc::Receiver<ServerEvent>,
    snapshots: watch::Sender<Arc<ServerState>>,
}

impl StateActor {
    pub fn new(store: StateStore, events: mpsc::Receiver<ServerEvent>) -> (Self, StateView) {
        let (snapshots, rx) = watch::channel(Arc::new(store.state().clone()));
        (
            Self {
                store,
                events,
                snapshots,
            },
            StateView { rx },
        )
    }

    /// 运行直到所有 `EventBus` 都被释放
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let mut changed = self.apply(event);

            for _ in 1..MAX_BATCH {
                match self.events.try_recv() {
                    Ok(event) => changed |= self.apply(event),
                    Err(_) => break,
                }
            }

            if changed {
                self.snapshots
                    .send_replace(Arc::new(self.store.state().clone()));
            }
        }

        debug!("State actor stopped");
    }

    fn apply(&mut self, event: ServerEvent) -> bool {
        trace!(event = event.name(), id = ?event.connection_id(), "Applying event");
        match self.store.apply(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Discarding server event");
                false
            }
        }
    }
}

/// 创建事件总线并在后台启动状态 actor
pub fn spawn_state_actor(capacity: usize, root: PathBuf) -> (EventBus, StateView, JoinHandle<()>) {
    let (bus, rx) = EventBus::new(capacity);
    let (actor, view) = StateActor::new(StateStore::new(root), rx);
    let handle = tokio::spawn(actor.run());
    (bus, view, handle)
}
