//! LanShare - 局域网文件共享
//!
//! 通过 HTTP 共享一个目录，并在终端仪表盘中显示实时连接和传输。
//!
//! # 日志
//!
//! 日志默认显示在 TUI 的"日志"标签页中。
//! 如需输出到文件进行调试，设置 RUST_LOG 环境变量：
//!
//! ```bash
//! RUST_LOG=debug cargo run -p lanshare-tui 2>> /tmp/lanshare.log
//! ```
//!
//! 使用 `--headless` 时不启动仪表盘，日志直接输出到 stderr。

mod app;
mod tui_log;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use lanshare_core::{FileServer, ServedRoot, ServerConfig, StateView, spawn_state_actor};
use ratatui::prelude::*;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use app::{App, AppEvent};
use tui_log::TuiLogLayer;

#[derive(Parser, Debug)]
#[command(name = "lanshare", version, about = "局域网文件共享 - 通过 HTTP 共享目录")]
struct Args {
    /// 要共享的目录 (默认: 当前目录)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 监听地址
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// 配置文件路径 (默认: <config_dir>/lanshare/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 列出隐藏文件
    #[arg(long)]
    show_hidden: bool,

    /// 不启动仪表盘，只输出日志
    #[arg(long)]
    headless: bool,
}

impl Args {
    /// 合并配置文件和命令行参数
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_from(path)?,
            None => ServerConfig::load(),
        };

        if let Some(dir) = self.dir {
            config.root = dir;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if self.show_hidden {
            config.show_hidden = true;
        }

        config.validate()?;
        Ok(config)
    }
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 正在运行的服务器及其状态 actor
struct Running {
    view: StateView,
    shutdown: CancellationToken,
    server: JoinHandle<io::Result<()>>,
    actor: JoinHandle<()>,
}

impl Running {
    async fn start(config: &ServerConfig) -> Result<Self> {
        let root = ServedRoot::new(&config.root)
            .with_context(|| format!("cannot serve {}", config.root.display()))?;
        let (bus, view, actor) =
            spawn_state_actor(config.event_capacity, root.path().to_path_buf());

        let server = FileServer::bind(config, root, bus)
            .await
            .with_context(|| format!("cannot listen on {}:{}", config.bind, config.port))?;
        info!("Serving at {}", server.base_url());

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(server.run(shutdown.clone()));

        Ok(Self {
            view,
            shutdown,
            server,
            actor,
        })
    }

    /// 停止接受新连接，等待进行中的请求和 actor 结束
    ///
    /// 超过 [`SHUTDOWN_GRACE`] 仍未结束的下载会被放弃。
    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.server).await {
            Ok(result) => result??,
            Err(_) => {
                warn!("Downloads still running after {SHUTDOWN_GRACE:?}, exiting anyway");
                return Ok(());
            }
        }
        self.actor.await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.headless;
    let config = args.into_config()?;

    if headless {
        init_headless_logging();
        return run_headless(&config).await;
    }

    // 日志系统尚未初始化，启动失败时错误直接返回
    let running = Running::start(&config).await?;

    // 创建 App（获取日志发送器）
    let app = App::new(running.view.clone());

    // 初始化日志系统，发送到 TUI 日志面板
    init_logging(app.event_tx.clone());
    info!(
        root = %config.root.display(),
        port = config.port,
        "LanShare dashboard started"
    );

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    running.stop().await?;
    res
}

async fn run_headless(config: &ServerConfig) -> Result<()> {
    let running = Running::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    running.stop().await
}

/// 初始化日志系统
///
/// - 总是将日志发送到 TUI 日志面板
/// - 如果设置了 RUST_LOG，同时输出到 stderr（用于调试）
fn init_logging(log_tx: tokio::sync::mpsc::Sender<AppEvent>) {
    // TUI 日志层 - 总是启用
    let tui_layer = TuiLogLayer::new(log_tx);

    // 设置过滤器
    let filter = default_filter();

    // 如果设置了 RUST_LOG，同时输出到 stderr
    if std::env::var("RUST_LOG").is_ok() {
        use tracing_subscriber::fmt;

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(false)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .with(stderr_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .try_init();
    }
}

fn init_headless_logging() {
    use tracing_subscriber::fmt;

    let _ = tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .try_init();
}

fn default_filter() -> EnvFilter {
    // 默认只显示 info 及以上级别
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lanshare_core=debug"))
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    loop {
        // Update app state (handle async events)
        app.tick();
        terminal.draw(|f| ui::draw(f, &app))?;

        // 使用 poll 避免无限阻塞
        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => {
                    let active = app.state.connections.len();
                    if active > 0 {
                        warn!(active, "Quitting with downloads in progress");
                    }
                    return Ok(());
                }
                KeyCode::Tab => app.next_tab(),
                KeyCode::Char('1') => app.tab = app::Tab::Connections,
                KeyCode::Char('2') => app.tab = app::Tab::Log,
                KeyCode::Up | KeyCode::Char('k') => app.previous_connection(),
                KeyCode::Down | KeyCode::Char('j') => app.next_connection(),
                KeyCode::Char('c') => app.clear_logs(),
                _ => {}
            }
        }
    }
}
