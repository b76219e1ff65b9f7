//! 文件系统访问
//!
//! - **resolver**: 请求路径到服务根目录下真实路径的安全解析
//! - **listing**: 目录列表读取与 HTML 渲染

pub mod listing;
pub mod resolver;

pub use listing::{FileKind, ListingEntry, read_listing, render_bare, render_pretty};
pub use resolver::{PathError, ServedRoot, resolve_path};
