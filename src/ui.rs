//! Terminal UI rendering.
//!
//! All drawing logic lives here, separated from application state ([`App`])
//! and input handling ([`crate::input`]).  Each panel is rendered purely from
//! its [`PollResult`]: `Loading`, `Ready` (latest record or a feed-specific
//! placeholder), or `Failed`.
//!
//! ## For contributors
//!
//! * The layout is one row per [`FeedGroup`] (overview stats, analyzer
//!   samples, anomalies) with panels split evenly inside a row, and a
//!   one-line status bar at the bottom.
//! * [`panel_lines`] is the only place that reads record fields.  It must
//!   cope with any record shape; use [`Record::text`] and fall back to JSON.
//! * [`ratatui`] is the TUI framework; see its docs for widget details.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Panel};
use crate::error::FETCH_FAILED_MESSAGE;
use crate::feeds::{FeedGroup, FeedKind};
use crate::poll::PollResult;
use crate::source::{self, Record};

const ROWS: [FeedGroup; 3] = [FeedGroup::Overview, FeedGroup::Analyzer, FeedGroup::Anomalies];

/// Draw the complete UI for one frame.
pub fn draw(app: &App, frame: &mut Frame) {
    let [main_area, status_area] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());

    let rows: Vec<Vec<usize>> = ROWS
        .iter()
        .map(|g| app.group(*g))
        .filter(|r| !r.is_empty())
        .collect();

    let row_areas = Layout::vertical(rows.iter().map(|_| Constraint::Fill(1))).split(main_area);
    for (row, area) in rows.iter().zip(row_areas.iter()) {
        let cells = Layout::horizontal(row.iter().map(|_| Constraint::Fill(1))).split(*area);
        for (&index, cell) in row.iter().zip(cells.iter()) {
            draw_panel(&app.panels[index], app.is_selected(index), frame, *cell);
        }
    }

    draw_status_bar(app, frame, status_area);
}

fn draw_panel(panel: &Panel, focused: bool, frame: &mut Frame, area: Rect) {
    let border = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let mut block = Block::default()
        .title(format!(" {} ", panel_title(panel)))
        .borders(Borders::ALL)
        .border_style(border);
    if let PollResult::Ready { fetched_at, .. } = &panel.result {
        block = block.title_bottom(Line::styled(
            format!(" updated {} ", fetched_at.format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let body = Paragraph::new(panel_lines(panel, focused))
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(body, area);
}

/// Panel heading.  Sampled feeds show the index of the displayed response.
pub fn panel_title(panel: &Panel) -> String {
    match (&panel.kind, &panel.result) {
        (
            FeedKind::Sample { endpoint },
            PollResult::Ready {
                sample_index: Some(index),
                ..
            },
        ) => format!("{endpoint}-{index}"),
        _ => panel.title.clone(),
    }
}

/// Body text for a panel in its current state.
pub fn panel_lines(panel: &Panel, focused: bool) -> Vec<Line<'static>> {
    match &panel.result {
        PollResult::Loading => vec![Line::from("Loading...")],
        PollResult::Failed(error) => vec![
            Line::styled(FETCH_FAILED_MESSAGE, Style::default().fg(Color::Red)),
            Line::styled(error.to_string(), Style::default().fg(Color::DarkGray)),
        ],
        PollResult::Ready { records, .. } => match source::latest(records) {
            None => vec![Line::styled(
                placeholder(&panel.kind),
                Style::default().fg(Color::Yellow),
            )],
            Some(record) => match &panel.kind {
                FeedKind::Anomaly(_) => anomaly_lines(record),
                FeedKind::Checks => check_lines(record, focused),
                FeedKind::Sample { .. } | FeedKind::Stats => json_lines(record, focused),
            },
        },
    }
}

fn placeholder(kind: &FeedKind) -> String {
    match kind {
        FeedKind::Sample { endpoint } => format!("No {endpoint} data found"),
        FeedKind::Stats => "No stats found".to_string(),
        FeedKind::Checks => "No service status found".to_string(),
        FeedKind::Anomaly(category) => format!("No {} anomalies found", category.label()),
    }
}

fn anomaly_lines(record: &Record) -> Vec<Line<'static>> {
    let label = Style::default().fg(Color::DarkGray);
    let missing = || "n/a".to_string();

    vec![
        Line::styled("Latest anomaly UUID:", label),
        Line::styled(
            record.text("event_id").unwrap_or_else(missing),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Line::from(record.text("description").unwrap_or_else(missing)),
        Line::from(vec![
            Span::styled("Detected on ", label),
            Span::raw(record.text("timestamp").unwrap_or_else(missing)),
        ]),
    ]
}

fn check_lines(record: &Record, focused: bool) -> Vec<Line<'static>> {
    let Some(services) = record.as_value().as_object() else {
        return json_lines(record, focused);
    };

    services
        .keys()
        .map(|service| {
            let status = record.text(service).unwrap_or_else(|| "n/a".to_string());
            let colour = if status == "Unavailable" {
                Color::Red
            } else {
                Color::Green
            };
            Line::from(vec![
                Span::styled(format!("{service:<12}"), Style::default().fg(Color::Cyan)),
                Span::styled(status, Style::default().fg(colour)),
            ])
        })
        .collect()
}

fn json_lines(record: &Record, focused: bool) -> Vec<Line<'static>> {
    if focused {
        record
            .to_pretty_json()
            .lines()
            .map(|l| Line::from(l.to_string()))
            .collect()
    } else {
        vec![Line::from(record.to_json())]
    }
}

/// Render the bottom status bar.
fn draw_status_bar(app: &App, frame: &mut Frame, area: Rect) {
    let tally = app.tally();
    let status = Paragraph::new(Line::from(vec![
        Span::styled(" ", Style::default()),
        Span::styled(&app.status, Style::default().fg(Color::Yellow)),
        Span::raw("  "),
        Span::styled(
            format!("{} ready", tally.ready),
            Style::default().fg(Color::Green),
        ),
        Span::raw(" "),
        Span::styled(
            format!("{} failed", tally.failed),
            Style::default().fg(Color::Red),
        ),
        Span::raw(" "),
        Span::styled(
            format!("{} loading", tally.loading),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  q: quit  Tab/↑/↓: focus  Home/End: jump"),
    ]));
    frame.render_widget(status, area);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
