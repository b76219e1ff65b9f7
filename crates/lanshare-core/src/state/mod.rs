//! 服务器状态同步
//!
//! 单写者模型：
//! - **events**: 事件类型与有界事件总线
//! - **tracker**: 连接生命周期守卫，保证 `ConnectionClosed` 恰好发出一次
//! - **store**: 连接表，只由 actor 修改
//! - **actor**: 唯一的事件消费者，发布状态快照

pub mod actor;
pub mod events;
pub mod store;
pub mod tracker;

pub use actor::{StateActor, StateView, spawn_state_actor};
pub use events::{ClientInfo, ConnectionId, EventBus, ServerEvent};
pub use store::{Connection, SPEED_WINDOW, ServerState, StateError, StateStore};
pub use tracker::ConnectionTracker;
