use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, AppState, Focus, InputMode, ListView, PanelState, RenderStats};
use crate::chat::grouping::{format_date_label, group_by_day, is_compact};
use crate::chat::{LoadStatus, MemberId, Message};
use crate::composer::ComposerPhase;

pub fn draw(f: &mut Frame<'_>, app: &mut App) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(0),    // Main content
            Constraint::Length(7), // Notice log
            Constraint::Length(3), // Input area
        ])
        .split(size);

    draw_title_bar(f, app, chunks[0]);

    if app.panel.is_closed() {
        draw_main_view(f, app, chunks[1]);
    } else {
        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[1]);
        draw_main_view(f, app, main_chunks[0]);
        draw_panel(f, app, main_chunks[1]);
    }

    draw_notices(f, app, chunks[2]);
    draw_input_area(f, app, chunks[3]);

    if app.input_mode == InputMode::Confirm {
        draw_confirm_popup(f, app, size);
    }
}

fn draw_title_bar(f: &mut Frame, app: &App, area: Rect) {
    let title_style = match app.state {
        AppState::Connected => Style::default().fg(Color::Green),
        AppState::Disconnected => Style::default().fg(Color::Red),
    };

    let scope = app.view.as_ref().map(|v| v.title.as_str()).unwrap_or("-");
    let title = format!(
        " {} | {} | {} ",
        app.me.user.name,
        scope,
        match app.state {
            AppState::Connected => "connected",
            AppState::Disconnected => "disconnected",
        }
    );

    let title_block = Block::default()
        .borders(Borders::ALL)
        .style(title_style)
        .title(" huddle ");

    let title_paragraph = Paragraph::new(title)
        .block(title_block)
        .alignment(Alignment::Center);

    f.render_widget(title_paragraph, area);
}

fn draw_main_view(f: &mut Frame, app: &mut App, area: Rect) {
    let me = app.me.id.clone();
    let focused = app.focus == Focus::Main;

    // Without an open view the main area doubles as the full log, so
    // multi-line command output (/help, /channels) is readable in whole.
    let Some(view) = app.view.as_mut() else {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" huddle ")
            .style(Style::default().fg(Color::Cyan));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let mut lines: Vec<Line> = app
            .notices
            .iter()
            .map(|notice| Line::from(notice.as_str()))
            .collect();
        lines.push(Line::from(Span::styled(
            "Not in a channel. /join <name> to open one, or /help for commands.",
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        )));
        let top = lines.len().saturating_sub(inner.height as usize);
        let log = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .scroll((top as u16, 0));
        f.render_widget(log, inner);
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", view.title))
        .style(Style::default().fg(if focused { Color::Cyan } else { Color::Gray }));
    let inner = block.inner(area);
    f.render_widget(block, area);

    render_message_list(f, &mut view.list, inner, &me, focused, None);
}

fn draw_panel(f: &mut Frame, app: &mut App, area: Rect) {
    match app.panel.clone() {
        PanelState::Thread(_) => draw_thread_panel(f, app, area),
        PanelState::Profile(member_id) => draw_profile_panel(f, app, area, &member_id),
        PanelState::Closed => {}
    }
}

fn draw_thread_panel(f: &mut Frame, app: &mut App, area: Rect) {
    let me = app.me.id.clone();
    let focused = app.focus == Focus::Panel;
    let Some(thread) = app.thread.as_mut() else {
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Thread ")
        .style(Style::default().fg(if focused { Color::Cyan } else { Color::Gray }));
    let inner = block.inner(area);
    f.render_widget(block, area);

    render_message_list(f, &mut thread.list, inner, &me, focused, thread.root.as_ref());
}

fn draw_profile_panel(f: &mut Frame, app: &App, area: Rect, member_id: &MemberId) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Profile ")
        .style(Style::default().fg(Color::Blue));

    let lines = match app.members.iter().find(|m| &m.id == member_id) {
        Some(member) => {
            let mut lines = vec![
                Line::from(vec![
                    Span::raw("Name:  "),
                    Span::styled(
                        member.user.name.clone(),
                        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                    ),
                ]),
                Line::from(vec![
                    Span::raw("Role:  "),
                    Span::styled(format!("{:?}", member.role), Style::default().fg(Color::Cyan)),
                ]),
            ];
            if let Some(email) = &member.user.email {
                lines.push(Line::from(vec![
                    Span::raw("Email: "),
                    Span::styled(email.clone(), Style::default().fg(Color::Gray)),
                ]));
            }
            lines
        }
        None => vec![Line::from(Span::styled(
            "Member not found",
            Style::default().fg(Color::Red),
        ))],
    };

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

/// Render a feed into `area`, oldest day at the top, and record the row
/// counts the load-more sentinel check needs on the next tick.
fn render_message_list(
    f: &mut Frame,
    list: &mut ListView,
    area: Rect,
    me: &MemberId,
    focused: bool,
    thread_root: Option<&Message>,
) {
    let selected_id = list.selected_message().map(|m| m.id.clone());
    let editing = list
        .editing
        .as_ref()
        .map(|e| (e.id.clone(), e.composer.editor().get_text().to_string()));

    let mut lines: Vec<Line<'static>> = Vec::new();

    if matches!(
        list.feed.status(),
        LoadStatus::LoadingFirstPage | LoadStatus::LoadingMore
    ) {
        lines.push(Line::from(Span::styled(
            "loading older messages…",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    if let Some(root) = thread_root {
        push_message_lines(&mut lines, root, me, false, &selected_id, &editing, focused);
        let replies = list.feed.results().len();
        lines.push(divider(format!(
            "{} {}",
            replies,
            if replies == 1 { "reply" } else { "replies" }
        )));
    }

    // Feed results are newest-first; day groups come out newest day
    // first with ascending messages inside, so reverse for display.
    let groups = group_by_day(list.feed.results());
    for group in groups.iter().rev() {
        lines.push(divider(format_date_label(group.date)));
        let mut previous: Option<&Message> = None;
        for message in group.messages.iter().copied() {
            let compact = previous.is_some_and(|p| is_compact(p, message));
            push_message_lines(&mut lines, message, me, compact, &selected_id, &editing, focused);
            previous = Some(message);
        }
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "No messages yet. Press 'i' and type to send one.",
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    list.render = RenderStats {
        total_rows: lines.len(),
        viewport_rows: area.height as usize,
    };

    let top = lines
        .len()
        .saturating_sub(area.height as usize + list.scroll_from_bottom);

    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((top as u16, 0));
    f.render_widget(paragraph, area);
}

fn divider(label: String) -> Line<'static> {
    Line::from(Span::styled(
        format!("── {label} ──"),
        Style::default().fg(Color::DarkGray),
    ))
}

fn push_message_lines(
    lines: &mut Vec<Line<'static>>,
    message: &Message,
    me: &MemberId,
    compact: bool,
    selected_id: &Option<crate::chat::MessageId>,
    editing: &Option<(crate::chat::MessageId, String)>,
    focused: bool,
) {
    let own = &message.member_id == me;
    let selected = focused && selected_id.as_ref() == Some(&message.id);
    let being_edited = editing.as_ref().map(|(id, _)| id) == Some(&message.id);

    let time = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%H:%M");

    if !compact {
        let name_color = if own { Color::Green } else { Color::Magenta };
        lines.push(Line::from(vec![
            Span::styled(
                message.author_name.clone(),
                Style::default().fg(name_color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {time}"), Style::default().fg(Color::DarkGray)),
        ]));
    }

    let mut spans = vec![Span::raw("  ")];
    if being_edited {
        let (_, draft) = editing.as_ref().unwrap();
        spans.push(Span::styled(
            draft.clone(),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::styled(
            " (editing)",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::ITALIC),
        ));
    } else {
        spans.push(Span::raw(message.text()));
        if message.image.is_some() {
            spans.push(Span::styled(" [image]", Style::default().fg(Color::Cyan)));
        }
        if message.is_edited() {
            spans.push(Span::styled(
                " (edited)",
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ));
        }
    }

    let mut line = Line::from(spans);
    if selected {
        line = line.patch_style(Style::default().bg(Color::DarkGray));
    }
    lines.push(line);

    if !message.reactions.is_empty() {
        let summary = message
            .reactions
            .iter()
            .map(|r| format!("{} {}", r.value, r.count))
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(Line::from(Span::styled(
            format!("  {summary}"),
            Style::default().fg(Color::Gray),
        )));
    }

    if let Some(thread) = &message.thread {
        if thread.count > 0 {
            lines.push(Line::from(Span::styled(
                format!(
                    "  ↳ {} {}",
                    thread.count,
                    if thread.count == 1 { "reply" } else { "replies" }
                ),
                Style::default().fg(Color::Blue),
            )));
        }
    }
}

/// Tail of the notice log; one line per notice, newest at the bottom.
fn draw_notices(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Log ")
        .style(Style::default().fg(Color::Yellow));
    let visible = area.height.saturating_sub(2) as usize;
    let start = app.notices.len().saturating_sub(visible);
    let lines: Vec<Line> = app.notices[start..]
        .iter()
        .map(|notice| Line::from(notice.as_str()))
        .collect();
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_input_area(f: &mut Frame, app: &App, area: Rect) {
    let input_style = match app.input_mode {
        InputMode::Normal => Style::default().fg(Color::White),
        InputMode::Editing => Style::default().fg(Color::Green),
        InputMode::Confirm => Style::default().fg(Color::Yellow),
    };

    let composer = app.active_composer();
    let phase_label = match composer.map(|c| c.phase()) {
        Some(ComposerPhase::Uploading) => " uploading…",
        Some(ComposerPhase::Sending) => " sending…",
        _ => "",
    };
    let attachment_label = composer
        .and_then(|c| c.attachment())
        .map(|a| format!(" [{}]", a.filename))
        .unwrap_or_default();

    let mode_indicator = match app.input_mode {
        InputMode::Normal => format!("[NORMAL] 'i' to type, 'q' to quit{phase_label}"),
        InputMode::Editing => {
            format!("[INPUT] ESC=normal, ENTER=send{phase_label}{attachment_label}")
        }
        InputMode::Confirm => "[CONFIRM] y/n".to_string(),
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .title(mode_indicator)
        .style(input_style);

    // With no view open this is the lobby command line.
    let editor = app.active_editor();
    let input_paragraph = Paragraph::new(editor.get_text().to_string())
        .block(input_block)
        .wrap(Wrap { trim: false });
    f.render_widget(input_paragraph, area);

    if app.input_mode == InputMode::Editing {
        let column = editor.get_text()[..editor.cursor()].chars().count();
        f.set_cursor(area.x + column as u16 + 1, area.y + 1);
    }
}

fn draw_confirm_popup(f: &mut Frame, app: &App, size: Rect) {
    let Some(confirm) = app.confirm.as_ref() else {
        return;
    };

    let width = (confirm.message.len() as u16 + 6).min(size.width.saturating_sub(4));
    let height = 5;
    let popup = Rect {
        x: size.width.saturating_sub(width) / 2,
        y: size.height.saturating_sub(height) / 2,
        width,
        height,
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Confirm ")
        .style(Style::default().fg(Color::Yellow));

    let lines = vec![
        Line::from(confirm.message.clone()),
        Line::from(""),
        Line::from(Span::styled(
            "y = yes    n = cancel",
            Style::default().fg(Color::Gray),
        )),
    ];

    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false }),
        popup,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{fixtures, Channel};
    use crate::remote::testing::StubBackend;
    use crate::remote::{Backend, LiveUpdate};
    use chrono::Utc;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn app_in_channel() -> App {
        let stub = StubBackend::default();
        *stub.channels.lock().unwrap() = vec![Channel {
            id: "c1".into(),
            name: "general".to_string(),
            workspace_id: "w1".into(),
            created_at: Utc::now(),
        }];
        let (_tx, rx) = mpsc::unbounded_channel::<LiveUpdate>();
        let backend: Arc<dyn Backend> = Arc::new(stub);
        App::new(backend, "w1".into(), rx, Some("general"))
            .await
            .unwrap()
    }

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[tokio::test]
    async fn selected_message_row_is_highlighted() {
        let mut app = app_in_channel().await;
        let mut message = fixtures::message("m1", "me", Utc::now());
        message.channel_id = Some("c1".into());
        app.apply_update(LiveUpdate::MessageCreated { message });
        app.view.as_mut().unwrap().list.selected = Some(0);

        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| draw(f, &mut app)).unwrap();

        let highlighted = terminal
            .backend()
            .buffer()
            .content
            .iter()
            .any(|cell| cell.bg == Color::DarkGray);
        assert!(highlighted, "selected row should carry the highlight bg");
    }

    #[tokio::test]
    async fn several_recent_notices_are_visible_at_once() {
        let stub = StubBackend::default();
        let (_tx, rx) = mpsc::unbounded_channel::<LiveUpdate>();
        let backend: Arc<dyn Backend> = Arc::new(stub);
        let mut app = App::new(backend, "w1".into(), rx, None).await.unwrap();
        app.add_notice("first line of output");
        app.add_notice("second line of output");
        app.add_notice("third line of output");

        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| draw(f, &mut app)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("first line of output"));
        assert!(text.contains("second line of output"));
        assert!(text.contains("third line of output"));
    }
}
