//! UI rendering module

use humansize::{BINARY, format_size};
use lanshare_core::{Connection, LogLevel};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, TableState, Tabs},
};
use std::time::{Duration, Instant};

use crate::app::{App, Tab};

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Status bar
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_main(frame, app, chunks[1]);
    draw_status_bar(frame, app, chunks[2]);
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["Connections [1]", "Log [2]"];
    let selected = match app.tab {
        Tab::Connections => 0,
        Tab::Log => 1,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" LanShare @ {} ", app.host_name)),
        )
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow).bold());

    frame.render_widget(tabs, area);
}

fn draw_main(frame: &mut Frame, app: &App, area: Rect) {
    match app.tab {
        Tab::Connections => draw_connections_tab(frame, app, area),
        Tab::Log => draw_log_tab(frame, app, area),
    }
}

fn draw_connections_tab(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(5)])
        .split(area);

    let state = &app.state;
    let url = state.base_url.as_deref().unwrap_or("starting...");
    let summary = vec![
        Line::from(vec![
            Span::raw("URL:    "),
            Span::styled(url, Style::default().fg(Color::Cyan).bold()),
        ]),
        Line::from(format!("Root:   {}", state.root.display())),
        Line::from(format!(
            "Active: {}   Total: {}",
            state.connections.len(),
            format_speed(state.total_speed())
        )),
    ];
    let summary =
        Paragraph::new(summary).block(Block::default().borders(Borders::ALL).title(" Server "));
    frame.render_widget(summary, chunks[0]);

    let now = Instant::now();
    let connections = app.connections();
    let rows: Vec<Row> = connections.iter().map(|c| connection_row(c, now)).collect();

    let header = Row::new(["Client", "File", "Progress", "Sent", "Speed", "Age"])
        .style(Style::default().fg(Color::Yellow).bold());
    let widths = [
        Constraint::Length(18),
        Constraint::Min(16),
        Constraint::Length(17),
        Constraint::Length(11),
        Constraint::Length(12),
        Constraint::Length(8),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Active connections "),
        )
        .row_highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));

    let mut table_state = TableState::default();
    if !connections.is_empty() {
        table_state.select(Some(app.selected));
    }
    frame.render_stateful_widget(table, chunks[1], &mut table_state);
}

fn connection_row(conn: &Connection, now: Instant) -> Row<'static> {
    let file = conn.file_name.clone().unwrap_or_else(|| conn.path.clone());
    let progress = conn
        .progress()
        .map_or_else(|| "-".to_string(), |p| progress_bar(p, 10));

    Row::new(vec![
        Cell::from(conn.client.host.clone()),
        Cell::from(file),
        Cell::from(progress),
        Cell::from(format_size(conn.sent, BINARY)),
        Cell::from(format_speed(conn.speed)),
        Cell::from(format_age(now.saturating_duration_since(conn.connected_at))),
    ])
}

fn draw_log_tab(frame: &mut Frame, app: &App, area: Rect) {
    let visible = usize::from(area.height.saturating_sub(2));
    let mut items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .take(visible)
        .map(|entry| {
            let mut spans = vec![
                Span::styled(
                    format!("{} {:<5} ", entry.level.icon(), entry.level.name()),
                    level_style(entry.level),
                ),
            ];
            if let Some(id) = entry.short_request_id() {
                spans.push(Span::styled(
                    format!("[{id}] "),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            spans.push(Span::raw(entry.message.clone()));
            ListItem::new(Line::from(spans))
        })
        .collect();
    items.reverse();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Log "));

    frame.render_widget(list, area);
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let status = Paragraph::new(format!(
        " Connections: {} │ Logs: {} │ [Tab]switch [↑/↓]select [c]clear logs [q]quit",
        app.state.connections.len(),
        app.logs.len()
    ))
    .block(Block::default().borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn level_style(level: LogLevel) -> Style {
    match level {
        LogLevel::Error => Style::default().fg(Color::Red).bold(),
        LogLevel::Warn => Style::default().fg(Color::Yellow),
        LogLevel::Info => Style::default().fg(Color::Green),
        LogLevel::Debug | LogLevel::Trace => Style::default().fg(Color::DarkGray),
    }
}

/// 文本进度条，例如 `█████░░░░░  50%`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn progress_bar(ratio: f64, width: usize) -> String {
    let ratio = ratio.clamp(0.0, 1.0);
    let filled = (ratio * width as f64).round() as usize;
    format!(
        "{}{} {:>3}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        (ratio * 100.0).round() as u8
    )
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64, BINARY))
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
