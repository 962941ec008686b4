mod app;

use std::io;
use std::time::Duration;

use app::{
    column_width, format_latency, refresh_interval, truncate, AppState, ConnectionStatus,
    ReportResponse,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let title = std::env::var("TITLE").unwrap_or_else(|_| "Mastermind Business System Sales".to_string());
    let refresh_interval = refresh_interval(std::env::var("REFRESH_MINS").ok().as_deref());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(90))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client, &title, refresh_interval).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    title: &str,
    refresh_interval: Duration,
) -> io::Result<()> {
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, title, refresh_interval))?;

        // Redraw at least once a second so the "refreshed Ns ago" counter moves.
        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO)
            .min(Duration::from_secs(1));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, title: &str, refresh_interval: Duration) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, title, chunks[0]);
    render_body(f, app, chunks[1]);
    render_footer(f, app, refresh_interval, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, title: &str, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 60)), Color::Red),
    };

    let warehouse = app.health.warehouse.clone().unwrap_or_else(|| "—".to_string());
    let since = app.health.start_date.clone().unwrap_or_else(|| "—".to_string());

    let title_spans = vec![
        Span::styled(
            format!(" {title}  "),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(format!("since {since}"), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(
            format!("{warehouse} p50 {}", format_latency(app.latency.p50_ms)),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} errors", app.health.warehouse_errors.unwrap_or(0)),
            Style::default().fg(Color::White),
        ),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(
            Style::default().fg(Color::DarkGray),
        ));

    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, area: Rect) {
    if app.reports.is_empty() {
        let paragraph = Paragraph::new("No reports loaded yet.")
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(paragraph, area);
        return;
    }

    // One pane per report, sized to its rows (+ header, borders, footer line).
    let constraints: Vec<Constraint> = app
        .reports
        .iter()
        .map(|r| Constraint::Min(r.rows.len() as u16 + 4))
        .collect();
    let panes = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (report, pane) in app.reports.iter().zip(panes.iter()) {
        render_report(f, report, *pane);
    }
}

fn render_report(f: &mut Frame, report: &ReportResponse, area: Rect) {
    let header_cells = report
        .columns
        .iter()
        .map(|h| Cell::from(h.as_str()).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let last = report.rows.len().saturating_sub(1);
    let rows: Vec<Row> = report
        .rows
        .iter()
        .enumerate()
        .map(|(i, cells)| {
            let width = cells.len();
            let row_cells = cells.iter().enumerate().map(|(j, c)| {
                let mut style = Style::default();
                if c.starts_with("$(") || c.starts_with('(') {
                    style = style.fg(Color::Red);
                } else if c == "-" {
                    style = style.fg(Color::DarkGray);
                }
                // totals column
                if j + 1 == width {
                    style = style.add_modifier(Modifier::BOLD);
                }
                Cell::from(c.as_str()).style(style)
            });
            let row = Row::new(row_cells);
            if i == last {
                row.style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            } else if i % 2 == 0 {
                row.style(Style::default().bg(Color::Rgb(0x1f, 0x2a, 0x3d)))
            } else {
                row
            }
        })
        .collect();

    let widths: Vec<Constraint> = (0..report.columns.len())
        .map(|col| Constraint::Length(column_width(report, col)))
        .collect();

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(Span::styled(
                    format!(" {} ", report.heading),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ))
                .title_bottom(Line::from(Span::styled(
                    format!(" Last Update: {} ", report.last_update),
                    Style::default().fg(Color::DarkGray),
                ))),
        );

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, app: &AppState, refresh_interval: Duration, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled(
            format!(
                "auto-refresh: {}m  │  refreshed {}s ago",
                refresh_interval.as_secs() / 60,
                app.last_refresh.elapsed().as_secs()
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
