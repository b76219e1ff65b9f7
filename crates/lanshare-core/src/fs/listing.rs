//! 目录列表
//!
//! 读取目录内容并渲染为 HTML。提供两种风格：
//!
//! - **pretty**: 带面包屑导航、文件大小、修改时间和文件类型标记的页面
//! - **bare**: 只有链接的极简 `<pre>` 列表

use humansize::{WINDOWS, format_size};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::path::Path;
use std::time::{Duration, SystemTime};

const CODE_EXTENSIONS: &[&str] = &[
    "go", "js", "ts", "jsx", "tsx", "py", "java", "c", "cpp", "h", "hpp", "cs", "php", "rb",
    "swift", "kt", "rs", "scala", "html", "css", "scss", "sass", "vue", "json", "xml", "yaml",
    "yml", "toml", "sql", "sh", "bash", "zsh", "fish", "ps1",
];

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "xz", "rar", "7z"];

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "log", "csv", "tsv"];

const STYLE: &str = r"
body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 960px; color: #222; }
nav { margin-bottom: 1rem; }
table { width: 100%; border-collapse: collapse; }
td, th { padding: .35rem .5rem; text-align: left; border-bottom: 1px solid #eee; }
td.size, td.modified { color: #666; white-space: nowrap; }
tr.dir a { font-weight: 600; }
tr.code a::before { content: '</> '; color: #888; }
tr.image a::before { content: '\1F5BC  '; }
tr.audio a::before { content: '\266B  '; }
tr.video a::before { content: '\25B6  '; }
tr.archive a::before { content: '\1F4E6  '; }
";

/// 文件类型（用于列表中的图标样式）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Code,
    Image,
    Audio,
    Video,
    Archive,
    Text,
    Other,
}

impl FileKind {
    /// 根据文件名推断类型
    pub fn classify(name: &str) -> Self {
        let Some(ext) = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return FileKind::Other;
        };

        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Code;
        }
        if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Archive;
        }
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Text;
        }

        match mime_guess::from_ext(&ext).first() {
            Some(mime) => match mime.type_().as_str() {
                "image" => FileKind::Image,
                "audio" => FileKind::Audio,
                "video" => FileKind::Video,
                "text" => FileKind::Text,
                _ => FileKind::Other,
            },
            None => FileKind::Other,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            FileKind::Directory => "dir",
            FileKind::Code => "code",
            FileKind::Image => "image",
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Archive => "archive",
            FileKind::Text => "text",
            FileKind::Other => "file",
        }
    }
}

/// 目录中的一项
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub name: String,
    pub href: String,
    pub kind: FileKind,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

impl ListingEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    fn display_name(&self) -> String {
        if self.is_dir() {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// 面包屑导航的一节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub name: String,
    pub href: String,
    pub is_last: bool,
}

/// 读取目录：目录在前、文件在后，各自按名称忽略大小写排序
///
/// 读取单个条目元数据失败时跳过该条目。
pub async fn read_listing(
    dir: &Path,
    request_path: &str,
    show_hidden: bool,
) -> std::io::Result<Vec<ListingEntry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !show_hidden && name.starts_with('.') {
            continue;
        }

        // metadata() 跟随符号链接，链接到目录的条目也按目录显示
        let Ok(metadata) = tokio::fs::metadata(entry.path()).await else {
            continue;
        };

        let href = join_href(request_path, &name);
        if metadata.is_dir() {
            dirs.push(ListingEntry {
                href: format!("{href}/"),
                name,
                kind: FileKind::Directory,
                size: None,
                modified: metadata.modified().ok(),
            });
        } else {
            files.push(ListingEntry {
                kind: FileKind::classify(&name),
                name,
                href,
                size: Some(metadata.len()),
                modified: metadata.modified().ok(),
            });
        }
    }

    dirs.sort_by_key(|e| e.name.to_lowercase());
    files.sort_by_key(|e| e.name.to_lowercase());
    dirs.extend(files);
    Ok(dirs)
}

/// 带导航和元信息的目录页面
pub fn render_pretty(request_path: &str, entries: &[ListingEntry], now: SystemTime) -> String {
    let crumbs = breadcrumbs(request_path);
    let parent = parent_href(request_path);

    let markup: Markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { "Index of " (request_path) }
                style { (PreEscaped(STYLE)) }
            }
            body {
                nav {
                    @for crumb in &crumbs {
                        @if crumb.is_last {
                            strong { (crumb.name) }
                        } @else {
                            a href=(crumb.href) { (crumb.name) }
                            " / "
                        }
                    }
                }
                table {
                    thead {
                        tr { th { "Name" } th { "Size" } th { "Modified" } }
                    }
                    tbody {
                        @if let Some(parent) = &parent {
                            tr.dir {
                                td { a href=(parent) { "../" } }
                                td.size {}
                                td.modified {}
                            }
                        }
                        @for entry in entries {
                            tr class=(entry.kind.css_class()) {
                                td { a href=(entry.href) { (entry.display_name()) } }
                                td.size { (entry.size.map(|s| format_size(s, WINDOWS)).unwrap_or_default()) }
                                td.modified { (entry.modified.map(|m| format_modified(m, now)).unwrap_or_default()) }
                            }
                        }
                    }
                }
            }
        }
    };

    markup.into_string()
}

/// 极简列表，适合 curl/wget 等非浏览器客户端
pub fn render_bare(entries: &[ListingEntry]) -> String {
    let markup: Markup = html! {
        (DOCTYPE)
        meta name="viewport" content="width=device-width";
        pre {
            @for entry in entries {
                a href=(entry.href) { (entry.display_name()) }
                "\n"
            }
        }
    };

    markup.into_string()
}

/// 面包屑：`Root` 加上路径的每一段
pub fn breadcrumbs(request_path: &str) -> Vec<Breadcrumb> {
    let segments: Vec<&str> = request_path.split('/').filter(|s| !s.is_empty()).collect();

    let mut crumbs = vec![Breadcrumb {
        name: "Root".to_string(),
        href: "/".to_string(),
        is_last: segments.is_empty(),
    }];

    let mut href = String::new();
    for (i, segment) in segments.iter().enumerate() {
        href.push('/');
        href.push_str(&urlencoding::encode(segment));
        crumbs.push(Breadcrumb {
            name: (*segment).to_string(),
            href: href.clone(),
            is_last: i == segments.len() - 1,
        });
    }

    crumbs
}

/// 上一级目录的链接，根目录没有上一级
pub fn parent_href(request_path: &str) -> Option<String> {
    let trimmed = request_path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let parent = match trimmed.rsplit_once('/') {
        Some((parent, _)) => parent
            .split('/')
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        None => String::new(),
    };
    Some(format!("/{parent}"))
}

/// 相对时间: "just now"、"5 minutes ago" …… 一周以上显示日期
pub fn format_modified(modified: SystemTime, now: SystemTime) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let secs = now
        .duration_since(modified)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };

    if secs < MINUTE {
        "just now".to_string()
    } else if secs < HOUR {
        plural(secs / MINUTE, "minute")
    } else if secs < DAY {
        plural(secs / HOUR, "hour")
    } else if secs < 7 * DAY {
        plural(secs / DAY, "day")
    } else {
        chrono::DateTime::<chrono::Local>::from(modified)
            .format("%b %-d, %Y")
            .to_string()
    }
}

fn join_href(request_path: &str, name: &str) -> String {
    let base = request_path.trim_end_matches('/');
    let base: String = base
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", urlencoding::encode(s)))
        .collect();
    format!("{base}/{}", urlencoding::encode(name))
}
