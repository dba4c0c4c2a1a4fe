use crate::errors::CodetraceError;
use crate::evaluation::EvaluationResult;
use crate::hotkeys::replay_controls_legend;
use crate::replay::playback::PlaybackState;
use crate::replay::replayer::{clamp_progress, ReplaySource, TimelineReplayer};
use crate::session::{EventKind, Session};
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Terminal;

const RECENT_EVENTS: usize = 6;
const TIMELINE_WIDTH: usize = 30;

/// Everything one replay screen draw needs.
#[derive(Debug, Clone, Copy)]
pub struct ReplayFrame<'a> {
    pub source: &'a ReplaySource,
    pub progress: f64,
    pub state: PlaybackState,
    pub default_template: &'a str,
}

pub fn render_replay_frame(
    frame_data: &ReplayFrame<'_>,
    width: u16,
    height: u16,
) -> Result<String, CodetraceError> {
    let backend = TestBackend::new(width, height);
    let mut terminal = Terminal::new(backend).map_err(|e| CodetraceError::Io(e.to_string()))?;
    terminal
        .draw(|frame| match frame_data.source {
            ReplaySource::Loaded(session) => draw_session(frame, frame_data, session),
            ReplaySource::NoSessionData { reason } => {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Min(3), Constraint::Length(1)])
                    .split(frame.area());
                let body = Paragraph::new(vec![
                    Line::from(Span::styled(
                        "No session data",
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(reason.as_str()),
                ])
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title("Replay"));
                frame.render_widget(body, chunks[0]);
                frame.render_widget(Paragraph::new("Keys: q quit"), chunks[1]);
            }
        })
        .map_err(|e| CodetraceError::Io(e.to_string()))?;

    let mut out = String::new();
    let buffer = terminal.backend().buffer();
    for y in 0..height {
        for x in 0..width {
            out.push_str(buffer[(x, y)].symbol());
        }
        out.push('\n');
    }
    Ok(out)
}

fn draw_session(frame: &mut ratatui::Frame<'_>, data: &ReplayFrame<'_>, session: &Session) {
    let replayer = TimelineReplayer::for_session(session, data.default_template);
    let progress = clamp_progress(data.progress);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let header = Paragraph::new(format!(
        "{} | session {} | {} keystrokes, {} pastes, {} runs",
        session.problem_statement,
        session.id,
        session.count_of(EventKind::Keystroke),
        session.count_of(EventKind::Paste),
        session.count_of(EventKind::Run),
    ))
    .block(Block::default().borders(Borders::ALL).title("Session"));
    frame.render_widget(header, rows[0]);

    let total = replayer.total_duration();
    let timeline = Paragraph::new(format!(
        "{} {:>5.1}%  {} / {}  {}",
        progress_bar(progress),
        progress,
        format_elapsed(replayer.target_time(progress).round() as u64),
        format_elapsed(total),
        data.state.as_str(),
    ))
    .block(Block::default().borders(Borders::ALL).title("Timeline"));
    frame.render_widget(timeline, rows[1]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[2]);

    let code = Paragraph::new(replayer.code_at_progress(progress))
        .block(Block::default().borders(Borders::ALL).title("Code"));
    match &session.evaluation {
        Some(evaluation) => {
            let left = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(6)])
                .split(columns[0]);
            frame.render_widget(code, left[0]);
            frame.render_widget(assessment(&evaluation.result), left[1]);
        }
        None => frame.render_widget(code, columns[0]),
    }

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(3)])
        .split(columns[1]);

    let score_lines = match &session.evaluation {
        Some(evaluation) => {
            let scores = evaluation.result.scores;
            vec![
                Line::from(format!("logic      {:>3}", scores.logic)),
                Line::from(format!("debugging  {:>3}", scores.debugging)),
                Line::from(format!("efficiency {:>3}", scores.efficiency)),
                Line::from(format!("creativity {:>3}", scores.creativity)),
            ]
        }
        None => vec![Line::from("Not evaluated")],
    };
    frame.render_widget(
        Paragraph::new(score_lines).block(Block::default().borders(Borders::ALL).title("Scores")),
        side[0],
    );

    let current = replayer.event_at_progress(progress);
    let shown = replayer.events_until(progress);
    let skip = shown.len().saturating_sub(RECENT_EVENTS);
    let items = shown
        .into_iter()
        .skip(skip)
        .map(|event| {
            let style = if current.is_some_and(|c| std::ptr::eq(c, event)) {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(format_elapsed(event.timestamp), Style::default().fg(Color::Cyan)),
                Span::styled(format!(" {:<9} {}", event.kind.as_str(), event.description), style),
            ]))
        })
        .collect::<Vec<_>>();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Events")),
        side[1],
    );

    frame.render_widget(Paragraph::new(replay_controls_legend()), rows[3]);
}

fn assessment(result: &EvaluationResult) -> Paragraph<'_> {
    let listed = |items: &[String]| {
        if items.is_empty() {
            "none listed".to_string()
        } else {
            items.join("; ")
        }
    };
    let label = Style::default().add_modifier(Modifier::BOLD);
    Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Summary: ", label),
            Span::raw(result.summary.as_str()),
        ]),
        Line::from(vec![
            Span::styled("Approach: ", label),
            Span::raw(result.approach.as_str()),
        ]),
        Line::from(vec![
            Span::styled("Strengths: ", label),
            Span::raw(listed(&result.strengths)),
        ]),
        Line::from(vec![
            Span::styled("Areas for Improvement: ", label),
            Span::raw(listed(&result.improvement_areas)),
        ]),
    ])
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).title("Assessment"))
}

fn progress_bar(progress: f64) -> String {
    let filled = ((progress / 100.0) * TIMELINE_WIDTH as f64).round() as usize;
    let filled = filled.min(TIMELINE_WIDTH);
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(TIMELINE_WIDTH - filled)
    )
}

/// `mm:ss`; minutes keep growing past 59.
pub fn format_elapsed(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
