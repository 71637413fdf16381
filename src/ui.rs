use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, Clear, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Wrap,
    },
};

use crate::app::{App, Focus, InputMode, NoticeLevel};
use crate::session::{Role, SaveOp};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, notice line, footer
    let [header_area, body_area, notice_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_body(app, frame, body_area);
    render_notice(app, frame, notice_area);
    render_footer(app, frame, footer_area);

    if app.show_settings {
        render_settings(app, frame, area);
    } else if app.show_upload {
        render_upload(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let mode = if app.live_search {
        Span::styled(" LIVE SEARCH ", Style::default().fg(Color::Black).bg(Color::Magenta).bold())
    } else {
        Span::styled(" KNOWLEDGE ", Style::default().fg(Color::Black).bg(Color::Green).bold())
    };

    let title = Line::from(vec![
        Span::styled(" kbchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        mode,
        Span::raw(" "),
        Span::styled(app.backend.base_url(), Style::default().fg(Color::DarkGray)),
    ]);

    frame.render_widget(Paragraph::new(title), area);
}

fn render_body(app: &mut App, frame: &mut Frame, area: Rect) {
    // Sidebar on the left, thread + composer on the right
    let [sidebar_area, right_area] =
        Layout::horizontal([Constraint::Length(28), Constraint::Min(0)]).areas(area);
    let [thread_area, composer_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(right_area);

    // Store areas for mouse hit-testing
    app.sidebar_area = Some(sidebar_area);
    app.thread_area = Some(thread_area);

    render_sidebar(app, frame, sidebar_area);
    render_thread(app, frame, thread_area);
    render_composer(app, frame, composer_area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Conversations ({}) ", app.sessions.len()));

    if app.sessions.is_empty() {
        let placeholder = Paragraph::new("No conversations.\nPress 'n' to create one.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let items: Vec<ListItem> = app
        .sessions
        .iter()
        .map(|session| {
            let marker = if session.is_active() { "● " } else { "  " };
            let style = if session.is_active() {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!("{}{}", marker, session.title)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_thread(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Thread;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let title = app
        .active_session()
        .map(|s| format!(" {} ", s.title))
        .unwrap_or_else(|| " No conversation ".to_string());

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner = block.inner(area);
    app.thread_height = inner.height;
    app.thread_width = inner.width;

    let Some(session_idx) = app.active_idx else {
        let placeholder = Paragraph::new("Select a conversation from the sidebar,\nor press 'n' to start a new one.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    };

    if app.sessions[session_idx].messages.is_empty() && !app.send_in_flight {
        let placeholder = Paragraph::new("Ask something about your documents...")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    let cursor = app.thread_cursor;
    let select_range = app.line_select.map(|s| s.range());

    for (idx, message) in app.sessions[session_idx].messages.iter().enumerate() {
        let is_cursor = focused && cursor == Some(idx);

        let (who, who_color) = match message.role {
            Role::User => ("You", Color::Cyan),
            Role::Assistant => ("Assistant", Color::Yellow),
        };
        let mut header = vec![
            Span::styled(
                format!("{who}:"),
                Style::default().fg(who_color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" {}", message.sent_at.format("%H:%M")),
                Style::default().fg(Color::DarkGray),
            ),
        ];
        if is_cursor {
            header.push(Span::styled(" ◀", Style::default().fg(Color::Blue).bold()));
        }
        if app.save_pending(idx, SaveOp::FullResponse) || app.save_pending(idx, SaveOp::Fragment) {
            header.push(Span::styled(
                " saving…",
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ));
        }
        lines.push(Line::from(header));

        for (line_idx, line) in message.content.lines().enumerate() {
            let selected = is_cursor
                && select_range.is_some_and(|(start, end)| line_idx >= start && line_idx <= end);
            let style = if selected {
                Style::default().fg(Color::Black).bg(Color::Yellow)
            } else if is_cursor {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(line.to_string(), style)));
        }
        lines.push(Line::default());
    }

    if app.send_in_flight {
        lines.push(Line::from(Span::styled(
            "Assistant:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{dots}"),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    app.total_thread_lines = lines.len() as u16;

    let paragraph = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.thread_scroll, 0));

    frame.render_widget(paragraph, area);

    if app.total_thread_lines > app.thread_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));

        let mut scrollbar_state = ScrollbarState::new(app.total_thread_lines as usize)
            .position(app.thread_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

fn render_composer(app: &mut App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing || app.focus == Focus::Composer {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let title = if app.live_search {
        " Message (live search) "
    } else {
        " Message "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible in long input
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.composer_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .composer
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);

    frame.render_widget(input, area);

    if editing && !app.show_settings && !app.show_upload {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_notice(app: &App, frame: &mut Frame, area: Rect) {
    let Some(notice) = app.current_notice() else {
        return;
    };

    let color = match notice.level {
        NoticeLevel::Info => Color::Blue,
        NoticeLevel::Success => Color::Green,
        NoticeLevel::Error => Color::Red,
    };

    let mut spans = vec![Span::styled(
        format!(" {} ", notice.title),
        Style::default().fg(Color::Black).bg(color).bold(),
    )];
    if !notice.body.is_empty() {
        spans.push(Span::styled(
            format!(" {}", notice.body),
            Style::default().fg(color),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let hints = if app.show_settings {
        "Enter test & save · Ctrl-R default · Esc close"
    } else if app.show_upload {
        "Enter upload · Esc close"
    } else if app.input_mode == InputMode::Editing {
        "Enter send · Esc done"
    } else if app.line_select.is_some() {
        "j/k extend · Enter capture · Esc cancel"
    } else {
        match app.focus {
            Focus::Sidebar => "j/k move · Enter open · n new · d delete · r refresh · w mode · u upload · B backend · q quit",
            Focus::Thread => "j/k move · v select · S save response · s save selection · Tab focus · q quit",
            Focus::Composer => "Enter/i type · Tab focus · q quit",
        }
    };

    let footer = Paragraph::new(Line::from(Span::styled(
        format!(" {hints}"),
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(footer, area);
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height.saturating_sub(4));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, popup_height)
}

fn render_settings(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 64, 8);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Backend Settings ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions =
        Paragraph::new("Backend URL. Enter to test & save, Ctrl-R for default, Esc to close.")
            .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input = Paragraph::new(app.settings_input.as_str())
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let status_area = Rect::new(inner.x, inner.y + 4, inner.width, 2);
    if app.settings_testing {
        frame.render_widget(
            Paragraph::new("Testing connection...")
                .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC)),
            status_area,
        );
    } else if let Some(error) = &app.settings_error {
        frame.render_widget(
            Paragraph::new(error.as_str())
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true }),
            status_area,
        );
    } else {
        frame.render_widget(
            Paragraph::new(format!("Current: {}", app.backend.base_url()))
                .style(Style::default().fg(Color::DarkGray)),
            status_area,
        );
    }

    if !app.settings_testing {
        let cursor_x = app.settings_cursor.min(inner.width.saturating_sub(1) as usize) as u16;
        frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
    }
}

fn render_upload(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 64, 7);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload Documents ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions =
        Paragraph::new("File paths (space separated). Enter to upload, Esc to close.")
            .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input = Paragraph::new(app.upload_input.as_str())
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.upload_cursor.min(inner.width.saturating_sub(1) as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}
