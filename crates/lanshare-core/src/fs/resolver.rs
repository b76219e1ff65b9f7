//! 安全路径解析
//!
//! 将请求路径解析到服务根目录之下的真实文件系统路径。
//!
//! # 安全性
//!
//! - 根目录在启动时规范化并解析符号链接，之后不再变化
//! - 请求路径先按词法清理 `.`/`..`，再解析符号链接
//! - 结果必须等于根目录或以「根目录 + 分隔符」开头（按路径组件比较，
//!   `/served` 不会匹配 `/served-evil`）
//! - 目标不存在时解析最深的已存在祖先目录，再拼回剩余部分

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path escapes the served root: {0}")]
    Forbidden(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 服务根目录（绝对路径，符号链接已解析）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRoot {
    path: PathBuf,
}

impl ServedRoot {
    /// 规范化根目录
    ///
    /// 根目录本身可能位于符号链接之后（例如 macOS 的 `/tmp`），
    /// 这里以真实位置作为信任边界。
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = std::fs::canonicalize(path.as_ref())?;
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", path.display()),
            ));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 解析请求路径
    pub async fn resolve(&self, request_path: &str) -> Result<PathBuf, PathError> {
        let joined = lexical_clean(&self.path.join(relative(request_path)));

        let resolved = match tokio::fs::canonicalize(&joined).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolve_missing(&joined).await?,
            Err(e) => return Err(PathError::Io(e)),
        };
        let resolved = lexical_clean(&resolved);

        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            warn!(
                request = request_path,
                resolved = %resolved.display(),
                "Path traversal attempt rejected"
            );
            Err(PathError::Forbidden(resolved))
        }
    }

    /// `Path::starts_with` 按组件比较，天然带有分隔符边界
    fn contains(&self, path: &Path) -> bool {
        path == self.path || path.starts_with(&self.path)
    }
}

/// 规范化 `root` 后解析 `request_path`
pub async fn resolve_path(root: &Path, request_path: &str) -> Result<PathBuf, PathError> {
    let root = tokio::fs::canonicalize(root).await?;
    ServedRoot { path: root }.resolve(request_path).await
}

/// 去掉根、前缀等组件，使请求路径总是相对于服务根目录
fn relative(request_path: &str) -> PathBuf {
    Path::new(request_path)
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

/// 纯词法清理：去掉 `.`，`..` 弹出上一级（不会越过根）
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// 目标不存在：向上找到最深的已存在祖先，解析其符号链接后拼回剩余组件
///
/// 这样即使文件尚不存在，也能判断它最终会落在哪里。
async fn resolve_missing(path: &Path) -> Result<PathBuf, PathError> {
    let mut tail = Vec::new();
    let mut current = path;

    loop {
        let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
            // 连文件系统根都不存在，只能保留词法结果
            return Ok(path.to_path_buf());
        };
        tail.push(name.to_os_string());

        match tokio::fs::canonicalize(parent).await {
            Ok(mut resolved) => {
                for name in tail.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => current = parent,
            Err(e) => return Err(PathError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ServedRoot) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("served/docs")).unwrap();
        fs::write(dir.path().join("served/docs/readme.txt"), b"hello").unwrap();
        fs::create_dir_all(dir.path().join("served-evil")).unwrap();
        fs::write(dir.path().join("served-evil/secret.txt"), b"secret").unwrap();
        fs::write(dir.path().join("outside.txt"), b"outside").unwrap();

        let root = ServedRoot::new(dir.path().join("served")).unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_resolve_inside_root() {
        let (_dir, root) = fixture();

        for request in ["/docs/readme.txt", "docs/readme.txt", "/docs/./readme.txt"] {
            let resolved = root.resolve(request).await.unwrap();
            assert!(resolved.starts_with(root.path()), "{request}");
            assert!(resolved.ends_with("docs/readme.txt"), "{request}");
        }

        assert_eq!(root.resolve("/").await.unwrap(), root.path());
        assert_eq!(root.resolve("").await.unwrap(), root.path());
    }

    #[tokio::test]
    async fn test_dot_dot_staying_inside_is_allowed() {
        let (_dir, root) = fixture();

        let resolved = root.resolve("/docs/../docs/readme.txt").await.unwrap();
        assert_eq!(resolved, root.path().join("docs/readme.txt"));
    }

    #[tokio::test]
    async fn test_dot_dot_escape_is_forbidden() {
        let (_dir, root) = fixture();

        for request in [
            "/../outside.txt",
            "../../../../etc/passwd",
            "/docs/../../outside.txt",
            "/../served-evil/secret.txt",
        ] {
            assert!(
                matches!(root.resolve(request).await, Err(PathError::Forbidden(_))),
                "{request}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_target_resolves_through_parent() {
        let (_dir, root) = fixture();

        let resolved = root.resolve("/docs/not-yet.txt").await.unwrap();
        assert_eq!(resolved, root.path().join("docs/not-yet.txt"));

        let resolved = root.resolve("/a/b/c.txt").await.unwrap();
        assert_eq!(resolved, root.path().join("a/b/c.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_forbidden() {
        let (dir, root) = fixture();
        std::os::unix::fs::symlink(dir.path(), root.path().join("escape")).unwrap();

        assert!(matches!(
            root.resolve("/escape/outside.txt").await,
            Err(PathError::Forbidden(_))
        ));
        // 目标不存在时通过父目录同样能识别越界
        assert!(matches!(
            root.resolve("/escape/missing.txt").await,
            Err(PathError::Forbidden(_))
        ));
        assert!(matches!(
            root.resolve("/escape/deeper/missing.txt").await,
            Err(PathError::Forbidden(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_allowed() {
        let (_dir, root) = fixture();
        std::os::unix::fs::symlink(root.path().join("docs"), root.path().join("alias")).unwrap();

        let resolved = root.resolve("/alias/readme.txt").await.unwrap();
        assert_eq!(resolved, root.path().join("docs/readme.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_root_is_reanchored() {
        let (dir, _root) = fixture();
        std::os::unix::fs::symlink(dir.path().join("served"), dir.path().join("link-to-served"))
            .unwrap();

        let root = ServedRoot::new(dir.path().join("link-to-served")).unwrap();
        assert_eq!(root.path(), fs::canonicalize(dir.path().join("served")).unwrap());
        assert!(root.resolve("/docs/readme.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_path_canonicalizes_root() {
        let (dir, root) = fixture();

        let resolved = resolve_path(&dir.path().join("served/docs/.."), "/docs/readme.txt")
            .await
            .unwrap();
        assert_eq!(resolved, root.path().join("docs/readme.txt"));

        assert!(matches!(
            resolve_path(&dir.path().join("served"), "/../outside.txt").await,
            Err(PathError::Forbidden(_))
        ));
    }

    #[test]
    fn test_root_must_be_directory() {
        let (dir, _root) = fixture();
        assert!(ServedRoot::new(dir.path().join("outside.txt")).is_err());
        assert!(ServedRoot::new(dir.path().join("nope")).is_err());
    }
}
