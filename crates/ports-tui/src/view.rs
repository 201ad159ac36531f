//! Two-pane layout: profiles on the left, details and recent output of the
//! selected profile on the right.

use ratatui::prelude::*;
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Wrap};

use ports_config::Profile;

use crate::app::{App, TunnelStatus};

const MIN_PANE_WIDTH: u16 = 26;

pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let Some(selected) = app.selected() else {
        frame.render_widget(Paragraph::new("No profiles found.\nPress q to quit.\n"), area);
        return;
    };

    let left_width = MIN_PANE_WIDTH.max(area.width / 3);
    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(left_width), Constraint::Min(MIN_PANE_WIDTH)])
        .split(area);

    render_profiles(frame, panes[0], app);
    render_details(frame, panes[1], app, selected);
}

fn pane(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title(Span::styled(format!(" {} ", title), Style::default().add_modifier(Modifier::BOLD)))
}

fn status_color(status: TunnelStatus) -> Color {
    match status {
        TunnelStatus::Running(_) => Color::Green,
        TunnelStatus::Starting => Color::Yellow,
        TunnelStatus::Stopped => Color::DarkGray,
    }
}

fn render_profiles(frame: &mut Frame, area: Rect, app: &App) {
    let mut lines: Vec<Line> = app
        .profiles()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let selected = i == app.cursor();
            let status = app.status_of(&p.name);
            let cursor = if selected { ">" } else { " " };
            let name_style = if selected {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{} {:<18} ", cursor, p.name), name_style),
                Span::styled(status.label(), Style::default().fg(status_color(status))),
            ])
        })
        .collect();

    lines.push(Line::default());
    lines.push(Line::styled(
        "j/k move • s start/stop • S stop all • q quit",
        Style::default().add_modifier(Modifier::DIM),
    ));

    frame.render_widget(Paragraph::new(lines).block(pane("Profiles")), area);
}

fn render_details(frame: &mut Frame, area: Rect, app: &App, p: &Profile) {
    let status = app.status_of(&p.name);

    let mut lines = vec![
        Line::from(format!("Name:   {}", p.name)),
        Line::from(format!("Target: {}", p.target())),
        Line::from(vec![
            Span::raw("Status: "),
            Span::styled(status_text(status), Style::default().fg(status_color(status))),
        ]),
        Line::default(),
        Line::styled("Forwards", Style::default().add_modifier(Modifier::BOLD)),
    ];

    if p.forwards.is_empty() {
        lines.push(Line::styled(
            "No forwards configured.",
            Style::default().add_modifier(Modifier::DIM),
        ));
    } else {
        for f in &p.forwards {
            lines.push(Line::from(format!(
                "{}:{} -> {}:{}",
                f.bind_or_default(),
                f.local_port,
                f.remote_host,
                f.remote_port
            )));
        }
    }

    if let Some(info) = &app.info {
        lines.push(Line::default());
        lines.push(Line::styled(info.clone(), Style::default().fg(Color::Green)));
    }
    if let Some(err) = &app.error {
        lines.push(Line::default());
        lines.push(Line::styled(format!("ERROR: {}", err), Style::default().fg(Color::Red)));
    }

    // Whatever height is left goes to the most recent output.
    let used = lines.len() as u16 + 4;
    let room = area.height.saturating_sub(used) as usize;
    let logs = app.logs(&p.name);
    if room > 0 && !logs.is_empty() {
        lines.push(Line::default());
        lines.push(Line::styled("Output", Style::default().add_modifier(Modifier::BOLD)));
        let skip = logs.len().saturating_sub(room);
        for line in &logs[skip..] {
            lines.push(Line::styled(line.clone(), Style::default().add_modifier(Modifier::DIM)));
        }
    }

    frame.render_widget(
        Paragraph::new(lines)
            .block(pane("Details"))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn status_text(status: TunnelStatus) -> String {
    match status {
        TunnelStatus::Running(pid) => format!("running (pid {})", pid),
        TunnelStatus::Starting => "starting".to_string(),
        TunnelStatus::Stopped => "stopped".to_string(),
    }
}
