use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, FocusPane};
use crate::render::{self, Affordance, ImageBlock, ImageState};
use crate::transcript::{Message, Role};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, input, footer
    let [header_area, body_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    if app.preview.is_collapsed() {
        render_transcript(app, frame, body_area);
    } else {
        let [transcript_area, preview_area] = Layout::horizontal([
            Constraint::Percentage(60),
            Constraint::Percentage(40),
        ])
        .areas(body_area);
        render_transcript(app, frame, transcript_area);
        render_preview(app, frame, preview_area);
    }

    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if let Some(alert) = app.alert.as_deref() {
        render_alert(alert, frame, area);
    } else if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let key_status = if app.api_key.is_empty() {
        Span::styled(" no API key ", Style::default().fg(Color::Red))
    } else {
        Span::styled(" key set ", Style::default().fg(Color::Green))
    };

    let mut spans = vec![
        Span::styled(" Gemini Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.selected_model.clone(), Style::default().fg(Color::White)),
        key_status,
    ];
    if app.in_flight > 0 {
        spans.push(Span::styled(
            format!("[{} pending] ", app.in_flight),
            Style::default().fg(Color::Yellow),
        ));
    }
    if app.voice_input.is_listening() {
        spans.push(Span::styled("● listening ", Style::default().fg(Color::Red).bold()));
    }
    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn role_style(role: Role) -> Style {
    match role {
        Role::User => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        Role::Ai => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        Role::System => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn image_line(image: &ImageBlock) -> Line<'static> {
    let style = Style::default().fg(Color::Magenta);
    let text = match &image.state {
        ImageState::Pending => format!("[image {} loading…]", image.mime_type),
        ImageState::Loaded { width, height, .. } => {
            format!("[image {} {}x{}]", image.mime_type, width, height)
        }
        ImageState::Broken(_) => format!("[image {} could not be displayed]", image.mime_type),
    };
    Line::from(Span::styled(text, style))
}

fn affordance_hints(message: &Message) -> Option<Line<'static>> {
    let body = message.rendered()?;
    let mut hints = Vec::new();
    let runs = body.run_code_affordances().count();
    if runs > 0 {
        hints.push(format!("▶ Run ({runs}) ^R"));
    }
    if body
        .affordances
        .iter()
        .any(|a| matches!(a, Affordance::ReadAloud { .. }))
    {
        hints.push("🔊 Read Aloud ^S".to_string());
    }
    if body.images().next().is_some() {
        hints.push("Open image ^G".to_string());
    }
    if hints.is_empty() {
        return None;
    }
    Some(Line::from(Span::styled(
        format!("  {}", hints.join("  ")),
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )))
}

fn message_lines(message: &Message, selected: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    let marker = if selected { "▌" } else { "" };
    let mut label_style = role_style(message.role);
    if selected {
        label_style = label_style.add_modifier(Modifier::REVERSED);
    }
    lines.push(Line::from(vec![
        Span::styled(marker, Style::default().fg(Color::Cyan)),
        Span::styled(format!("{}:", message.role.label()), label_style),
    ]));

    if let Some(text) = message.plain_text() {
        let style = match message.role {
            Role::System => Style::default().fg(Color::Red),
            _ => Style::default(),
        };
        for line in text.lines() {
            lines.push(Line::from(Span::styled(line.to_string(), style)));
        }
    } else if let Some(body) = message.rendered() {
        for block in &body.blocks {
            match block {
                render::Block::Text(text) => lines.extend(text.lines.iter().cloned()),
                render::Block::Image(image) => lines.push(image_line(image)),
            }
        }
        if selected {
            lines.extend(affordance_hints(message));
        }
    }

    lines.push(Line::default());
    lines
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing
    app.transcript_area = Some(area);

    let focused = app.focus == FocusPane::Transcript;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chat ");

    let selected = app.transcript.selected_id();
    let mut lines: Vec<Line> = Vec::new();
    if app.transcript.is_empty() && app.in_flight == 0 {
        lines.push(Line::from(Span::styled(
            "Set your API key with Ctrl+K, then type a message...",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for message in app.transcript.messages() {
        lines.extend(message_lines(message, selected == Some(message.id)));
    }

    if app.in_flight > 0 {
        lines.push(Line::from(Span::styled("AI:", role_style(Role::Ai))));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    // Resolve the "stick to bottom" sentinel against the wrapped content
    // height, measured with the same wrapping the paragraph is drawn with
    let inner_height = area.height.saturating_sub(2);
    let inner_width = area.width.saturating_sub(2);
    let chat = Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false });
    let content_height = chat.line_count(inner_width).min(u16::MAX as usize) as u16;
    let scroll = app
        .transcript
        .clamp_scroll(content_height.saturating_sub(inner_height));

    let chat = chat.block(block).scroll((scroll, 0));

    frame.render_widget(chat, area);
}

fn render_preview(app: &App, frame: &mut Frame, area: Rect) {
    let title = match app.preview.host_path() {
        Some(_) => " Live Preview (^B open in browser, ^X clear, ^P hide) ",
        None => " Live Preview (^X clear, ^P hide) ",
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(title);

    let text = if app.preview.document().is_empty() {
        Text::from(Span::styled(
            "Run a code block with Ctrl+R to preview it here.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(app.preview.document().to_string())
    };

    let preview = Paragraph::new(text).block(block).wrap(Wrap { trim: false });
    frame.render_widget(preview, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Input;
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };
    let title = if app.voice_input.is_listening() {
        " Listening... "
    } else {
        " Message (Enter to send) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let popup_open = app.alert.is_some() || app.show_api_key_input || app.show_model_picker;
    if focused && !popup_open {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let content = match app.status.as_deref() {
        Some(status) => Line::from(Span::styled(
            format!(" {status}"),
            Style::default().fg(Color::Yellow),
        )),
        None => {
            let key = Style::default().fg(Color::Cyan);
            let desc = Style::default().fg(Color::DarkGray);
            let mut spans = Vec::new();
            let mut hints = vec![
                ("^K", "key"),
                ("^V", "verify"),
                ("^O", "model"),
                ("↑↓", "select"),
                ("^R", "run"),
                ("^P", "preview"),
            ];
            if app.tts.is_available() {
                hints.push(("^S", "speak"));
            }
            if app.voice_input.is_available() {
                hints.push(("^L", "listen"));
            }
            hints.push(("^C", "quit"));
            for (k, d) in hints {
                spans.push(Span::styled(format!(" {k}"), key));
                spans.push(Span::styled(format!(" {d} "), desc));
            }
            Line::from(spans)
        }
    };

    let footer = Paragraph::new(content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_alert(alert: &str, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 50, 5);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Alert (any key to dismiss) ");

    let text = Paragraph::new(alert.to_string())
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(text, popup_area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 44, app.models.len() as u16 + 2);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let items: Vec<ListItem> = app
        .models
        .iter()
        .map(|model| {
            let style = if model == &app.selected_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
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

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

/// Mask the key with asterisks (show last 4 chars)
fn masked_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    let masked_len = len - 4;
    let last_four: String = key.chars().skip(masked_len).collect();
    format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 60, 7);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Enter Gemini API Key ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Kept in memory for this session only. Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));

    let instructions_area = Rect::new(inner.x, inner.y, inner.width, 1);
    frame.render_widget(instructions, instructions_area);

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input = Paragraph::new(masked_key(&app.api_key_input))
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.api_key_input_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let char_count = format!("{} characters", app.api_key_input.chars().count());
    let status = Paragraph::new(char_count)
        .style(Style::default().fg(Color::DarkGray));

    let status_area = Rect::new(inner.x, inner.y + 4, inner.width, 1);
    frame.render_widget(status, status_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gemini::Part;
    use ratatui::{backend::TestBackend, Terminal};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn test_app(dir: &TempDir) -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = Config {
            preview_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        App::new(config, tx)
    }

    #[test]
    fn masks_all_but_the_last_four_characters() {
        assert_eq!(masked_key("abc"), "***");
        assert_eq!(masked_key("abcdefgh"), "****...efgh");
    }

    #[test]
    fn draws_roles_and_image_placeholders() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.transcript.append_text(Role::User, "Hello");
        app.transcript
            .append_parts(&[Part::text("Hi there"), Part::inline_data("image/png", "AAAA")]);

        let screen = draw(&mut app);
        assert!(screen.contains("You:"));
        assert!(screen.contains("Hi there"));
        assert!(screen.contains("[image image/png loading…]"));
        assert!(app.transcript_area.is_some());
    }

    #[test]
    fn scroll_sentinel_is_clamped_after_drawing() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        for i in 0..40 {
            app.transcript.append_text(Role::System, format!("line {i}"));
        }
        assert_eq!(app.transcript.scroll(), u16::MAX);
        let screen = draw(&mut app);
        assert!(app.transcript.scroll() < u16::MAX);
        assert!(screen.contains("line 39"));
    }

    #[test]
    fn word_wrapped_replies_still_scroll_to_the_newest_message() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        let long_words = vec!["x".repeat(39); 40].join(" ");
        app.transcript.append_parts(&[Part::text(long_words)]);
        app.transcript.append_text(Role::System, "ENDMARKER");

        let screen = draw(&mut app);
        assert!(screen.contains("ENDMARKER"));
    }

    #[test]
    fn alert_popup_is_drawn_over_everything() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.alert = Some("Please enter an API key first!".to_string());
        assert!(draw(&mut app).contains("Please enter an API key first!"));
    }
}
