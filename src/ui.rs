pub mod charting;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle},
        Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph, Widget, Wrap,
    },
};
use time_humanize::HumanTime;
use unicode_width::UnicodeWidthStr;

use taiso::advice::{score_color, score_message};
use taiso::game::{GamePhase, GAME_HEIGHT, GAME_WIDTH};
use taiso::gate::INSIDE_FRAMES;
use taiso::history::ComparisonRow;
use taiso::sequencer::Phase;

use crate::{App, AppState, ResultsView};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Chat => render_chat(self, area, buf),
            AppState::Session => render_session(self, area, buf),
            AppState::Results => render_results(self, area, buf),
            AppState::Game => render_game(self, area, buf),
        }
    }
}

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn italic() -> Style {
    Style::default().add_modifier(Modifier::ITALIC)
}

fn render_chat(app: &App, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(4),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);

    Paragraph::new(Span::styled(
        format!("taiso / {}", app.config.user_id),
        bold().fg(Color::Cyan),
    ))
    .render(chunks[0], buf);

    let mut lines: Vec<Line> = Vec::new();
    for entry in &app.chat_lines {
        let (prefix, style) = if entry.from_user {
            ("あなた> ", Style::default().fg(Color::Cyan))
        } else {
            ("コーチ> ", Style::default().fg(Color::Green))
        };
        for (i, text) in entry.text.lines().enumerate() {
            let head = if i == 0 { prefix } else { "        " };
            lines.push(Line::from(vec![
                Span::styled(head, style),
                Span::raw(text.to_string()),
            ]));
        }
    }
    // keep the newest lines visible
    let scroll = (lines.len() as u16).saturating_sub(chunks[1].height);
    Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0))
        .render(chunks[1], buf);

    let input_title = if app.chat_busy {
        "メッセージ (送信中)"
    } else {
        "メッセージ"
    };
    let inner_width = chunks[2].width.saturating_sub(3) as usize;
    let visible = fit_tail(&app.chat_input, inner_width);
    Paragraph::new(format!("{visible}▏"))
        .block(Block::default().borders(Borders::ALL).title(input_title))
        .render(chunks[2], buf);

    let status = app.status.as_deref().unwrap_or("");
    Paragraph::new(Span::styled(status, Style::default().fg(Color::Yellow))).render(chunks[3], buf);

    let voice = if app.config.control_url.is_some() {
        " / (tab) 音声"
    } else {
        ""
    };
    Paragraph::new(Span::styled(
        format!("(enter) 送信{voice} / (ctrl+g) ゲーム / (esc) 終了"),
        italic(),
    ))
    .render(chunks[4], buf);
}

/// Drop leading characters until the text fits `width` terminal cells,
/// so the cursor end of the input always stays visible.
fn fit_tail(text: &str, width: usize) -> &str {
    let mut s = text;
    while s.width() > width {
        let mut chars = s.chars();
        chars.next();
        s = chars.as_str();
    }
    s
}

fn render_session(app: &App, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);

    Paragraph::new(Span::styled(
        format!("taiso / {}", app.sequencer.phase()),
        Style::default().fg(Color::DarkGray),
    ))
    .render(chunks[0], buf);

    match app.sequencer.phase() {
        Phase::Waiting => {
            Paragraph::new(Span::styled(
                "全身がカメラに映る位置に立ってください",
                bold(),
            ))
            .alignment(Alignment::Center)
            .render(chunks[1], buf);

            let streak = app.sequencer.inside_streak().min(INSIDE_FRAMES);
            Gauge::default()
                .ratio(f64::from(streak) / f64::from(INSIDE_FRAMES))
                .label(format!("位置キープ {streak}/{INSIDE_FRAMES}"))
                .gauge_style(Style::default().fg(Color::Green))
                .render(chunks[2], buf);
        }
        Phase::Counting => {
            let text = app.sequencer.countdown_text().unwrap_or_default();
            Paragraph::new(Span::styled(text.to_string(), bold().fg(Color::Yellow)))
                .alignment(Alignment::Center)
                .render(chunks[1], buf);
        }
        Phase::Running => {
            let total = app.sequencer.routine.len();
            let index = app.sequencer.step_index().unwrap_or(0);
            let name = app
                .sequencer
                .current_step()
                .map(|s| s.name.as_str())
                .unwrap_or("");

            Paragraph::new(Span::styled(name.to_string(), bold().fg(Color::Cyan)))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true })
                .render(chunks[1], buf);
            Paragraph::new(format!("ステップ {} / {total}", index + 1))
                .alignment(Alignment::Center)
                .render(chunks[2], buf);
            Paragraph::new(Span::styled(
                format!("記録フレーム数: {}", app.sequencer.frames_collected()),
                Style::default().fg(Color::DarkGray),
            ))
            .alignment(Alignment::Center)
            .render(chunks[3], buf);
        }
        Phase::Scoring => {
            let text = app.status.as_deref().unwrap_or("採点しています…");
            Paragraph::new(Span::styled(text.to_string(), bold()))
                .alignment(Alignment::Center)
                .render(chunks[1], buf);
        }
    }

    let legend = match app.sequencer.phase() {
        Phase::Running => "(esc) ここで終えて採点",
        _ => "(esc) チャットへもどる",
    };
    Paragraph::new(Span::styled(legend, italic())).render(chunks[4], buf);
}

fn render_results(app: &App, area: Rect, buf: &mut Buffer) {
    let Some(view) = &app.results else {
        Paragraph::new("結果がまだありません")
            .alignment(Alignment::Center)
            .render(area, buf);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);

    let overall = view.report.overall;
    Paragraph::new(vec![
        Line::from(Span::styled(
            format!("総合スコア {overall:.1}"),
            bold().fg(score_color(overall)),
        )),
        Line::from(Span::raw(score_message(overall))),
    ])
    .alignment(Alignment::Center)
    .render(chunks[0], buf);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);

    render_exercise_table(app, view, columns[0], buf);
    render_advice_column(view, columns[1], buf);

    render_history_chart(&view.history, chunks[2], buf);

    Paragraph::new(Span::styled(
        format!("session finished {}", finished_ago(view)),
        Style::default().fg(Color::DarkGray),
    ))
    .render(chunks[3], buf);

    Paragraph::new(Span::styled(
        "(r) もう一度 / (g) おすすめゲーム / (esc) チャットへ",
        italic(),
    ))
    .render(chunks[4], buf);
}

fn finished_ago(view: &ResultsView) -> HumanTime {
    let secs = chrono::Local::now()
        .signed_duration_since(view.finished_at)
        .num_seconds();
    HumanTime::from(-secs)
}

fn render_exercise_table(app: &App, view: &ResultsView, area: Rect, buf: &mut Buffer) {
    let mut lines: Vec<Line> = vec![Line::from(Span::styled("種目別スコア", bold()))];

    if view.comparison.is_empty() {
        for ex in &view.report.exercises {
            let label = app.sequencer.routine.label(&ex.exercise);
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{:>5.1}  ", ex.mean_score),
                    Style::default().fg(score_color(ex.mean_score)),
                ),
                Span::raw(label.to_string()),
            ]));
        }
    } else {
        for row in &view.comparison {
            lines.push(comparison_line(app, row));
        }
    }

    Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .render(area, buf);
}

fn comparison_line<'a>(app: &'a App, row: &ComparisonRow) -> Line<'a> {
    let label = app.sequencer.routine.label(&row.exercise);
    Line::from(vec![
        Span::styled(
            format!("{:>5.1}  ", row.curr),
            Style::default().fg(score_color(row.curr)),
        ),
        Span::raw(format!(
            "前回{} ベスト{}  ",
            signed(row.diff_prev),
            signed(row.diff_best)
        )),
        Span::raw(label.to_string()),
    ])
}

fn signed(diff: Option<f64>) -> String {
    match diff {
        Some(d) => format!("{d:+.1}"),
        None => "--".to_string(),
    }
}

fn render_advice_column(view: &ResultsView, area: Rect, buf: &mut Buffer) {
    let mut lines: Vec<Line> = vec![Line::from(Span::styled("アドバイス", bold()))];
    for (label, advice) in &view.advice {
        lines.push(Line::from(Span::styled(
            format!("・{label}"),
            Style::default().fg(Color::Yellow),
        )));
        lines.push(Line::from(Span::raw(format!("  {advice}"))));
    }
    if !view.weak_parts.is_empty() {
        lines.push(Line::from(Span::raw(format!(
            "重点部位: {}",
            view.weak_parts.join("・")
        ))));
    }
    lines.push(Line::from(Span::styled(
        format!("おすすめ: {}", view.game.label),
        bold().fg(Color::Magenta),
    )));
    lines.push(Line::from(Span::raw(view.game.reason)));

    Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .render(area, buf);
}

fn render_history_chart(history: &[f64], area: Rect, buf: &mut Buffer) {
    if history.is_empty() {
        return;
    }
    let points = charting::history_points(history);
    let (x_min, x_max) = charting::history_x_bounds(history.len());
    let (y_min, y_max) = charting::SCORE_BOUNDS;

    let datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Magenta))
        .data(&points)];

    Chart::new(datasets)
        .x_axis(
            Axis::default()
                .title("session")
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::styled(charting::format_label(x_min), bold()),
                    Span::styled(charting::format_label(x_max), bold()),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("score")
                .bounds([y_min, y_max])
                .labels(vec![
                    Span::styled("0", bold()),
                    Span::styled("50", bold()),
                    Span::styled("100", bold()),
                ]),
        )
        .render(area, buf);
}

fn render_game(app: &App, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(1)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(area);

    Paragraph::new(Span::styled(
        format!(
            "風船つかみ  スコア {}  残り {} 秒",
            app.game.score(),
            app.game.remaining_secs()
        ),
        bold(),
    ))
    .alignment(Alignment::Center)
    .render(chunks[0], buf);

    Canvas::default()
        .block(Block::default().borders(Borders::ALL))
        .x_bounds([0.0, GAME_WIDTH])
        .y_bounds([0.0, GAME_HEIGHT])
        .paint(|ctx| {
            for balloon in app.game.balloons() {
                ctx.draw(&Circle {
                    x: balloon.x,
                    // canvas y grows upward, game y downward
                    y: GAME_HEIGHT - balloon.y,
                    radius: balloon.radius,
                    color: Color::Red,
                });
            }
            if let Some((hx, hy)) = app.game.hand() {
                ctx.draw(&Circle {
                    x: hx,
                    y: GAME_HEIGHT - hy,
                    radius: 8.0,
                    color: Color::Cyan,
                });
            }
            if let Some(text) = app.game.countdown_text() {
                ctx.print(
                    GAME_WIDTH / 2.0,
                    GAME_HEIGHT / 2.0,
                    Line::styled(text, bold().fg(Color::Yellow)),
                );
            }
            if app.game.phase() == GamePhase::Over {
                ctx.print(
                    GAME_WIDTH / 2.0,
                    GAME_HEIGHT / 2.0,
                    Line::styled(
                        format!("おしまい！ スコア {}", app.game.score()),
                        bold().fg(Color::Green),
                    ),
                );
            }
        })
        .render(chunks[1], buf);

    Paragraph::new(Span::styled("(r) もう一度 / (esc) もどる", italic()))
        .render(chunks[2], buf);
}
