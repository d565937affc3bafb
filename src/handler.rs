use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane};
use crate::tui::AppEvent;

const PAGE_LINES: u16 = 10;
const WHEEL_LINES: u16 = 3;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Reply {
            request,
            kind,
            model,
            result,
        } => app.apply_reply(request, kind, &model, result),
        AppEvent::ImageDecoded {
            message,
            block,
            state,
        } => app.apply_image(message, block, state),
        AppEvent::Voice(event) => app.apply_recognition(event),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // Popups take every key while open; any key dismisses the alert
    if app.alert.take().is_some() {
        return;
    }
    if app.show_api_key_input {
        handle_api_key_input(app, key);
        return;
    }
    if app.show_model_picker {
        handle_model_picker(app, key);
        return;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        handle_command(app, key);
        return;
    }

    // Any keypress that isn't a command clears the last status line
    app.status = None;

    match key.code {
        KeyCode::Esc => app.should_quit = true,

        // Message selection
        KeyCode::Up => {
            app.transcript.select_prev();
            app.focus = FocusPane::Transcript;
        }
        KeyCode::Down => {
            app.transcript.select_next();
            if app.transcript.selected_id().is_none() {
                app.focus = FocusPane::Input;
            }
        }

        KeyCode::PageUp => app.transcript.scroll_up(PAGE_LINES),
        KeyCode::PageDown => app.transcript.scroll_down(PAGE_LINES),

        KeyCode::Enter => app.submit(),

        _ => {
            app.focus = FocusPane::Input;
            handle_input_editing(app, key);
        }
    }
}

fn handle_command(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('v') => app.verify(),
        KeyCode::Char('k') => app.open_api_key_input(),
        KeyCode::Char('o') => app.open_model_picker(),
        KeyCode::Char('l') => app.start_listening(),

        // Preview surface
        KeyCode::Char('p') => app.preview.toggle_minimized(),
        KeyCode::Char('x') => app.clear_preview(),
        KeyCode::Char('b') => app.open_preview(),

        // Actions on the selected (or latest ai) message
        KeyCode::Char('r') => app.run_code(),
        KeyCode::Char('s') => app.read_aloud(),
        KeyCode::Char('g') => app.open_image(),

        _ => {}
    }
}

fn handle_input_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
            app.input.insert(byte_pos, c);
            app.input_cursor += 1;
            app.transcript.clear_selection();
        }
        _ => {}
    }
}

fn handle_api_key_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_api_key_input = false;
            app.api_key_input.clear();
            app.api_key_input_cursor = 0;
        }
        KeyCode::Enter => app.save_api_key(),
        KeyCode::Backspace => {
            if app.api_key_input_cursor > 0 {
                app.api_key_input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_input_cursor);
                app.api_key_input.remove(byte_pos);
            }
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_input_cursor);
            app.api_key_input.insert(byte_pos, c);
            app.api_key_input_cursor += 1;
        }
        KeyCode::Left => {
            app.api_key_input_cursor = app.api_key_input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.api_key_input.chars().count();
            app.api_key_input_cursor = (app.api_key_input_cursor + 1).min(char_count);
        }
        _ => {}
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_model_picker = false;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            app.model_picker_nav_down();
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.model_picker_nav_up();
        }
        KeyCode::Enter => {
            app.select_model();
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_transcript = app
        .transcript_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_transcript {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.transcript.scroll_down(WHEEL_LINES),
        MouseEventKind::ScrollUp => app.transcript.scroll_up(WHEEL_LINES),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crossterm::event::{KeyEventKind, KeyEventState, KeyModifiers};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn test_app(dir: &TempDir) -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = Config {
            preview_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        App::new(config, tx)
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            ..press(KeyCode::Char(c))
        }
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_key(app, press(KeyCode::Char(c)));
        }
    }

    #[test]
    fn char_index_maps_to_utf8_byte_offsets() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[test]
    fn editing_respects_the_cursor() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_text(&mut app, "hllo");
        handle_key(&mut app, press(KeyCode::Home));
        handle_key(&mut app, press(KeyCode::Right));
        type_text(&mut app, "e");
        assert_eq!(app.input, "hello");

        handle_key(&mut app, press(KeyCode::End));
        handle_key(&mut app, press(KeyCode::Backspace));
        assert_eq!(app.input, "hell");
        assert_eq!(app.input_cursor, 4);
    }

    #[test]
    fn enter_without_a_key_raises_an_alert_that_any_key_dismisses() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_text(&mut app, "Hello");
        handle_key(&mut app, press(KeyCode::Enter));
        assert!(app.alert.is_some());
        assert!(app.transcript.is_empty());

        // The dismissing key is not typed into the input
        type_text(&mut app, "x");
        assert!(app.alert.is_none());
        assert_eq!(app.input, "Hello");
        assert!(!app.should_quit);

        handle_key(&mut app, press(KeyCode::Enter));
        handle_key(&mut app, press(KeyCode::Esc));
        assert!(app.alert.is_none());
        assert!(!app.should_quit);
    }

    #[test]
    fn api_key_popup_stores_the_key_in_memory() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        handle_key(&mut app, ctrl('k'));
        assert!(app.show_api_key_input);

        type_text(&mut app, " secret ");
        handle_key(&mut app, press(KeyCode::Enter));
        assert!(!app.show_api_key_input);
        assert_eq!(app.api_key, "secret");
        assert!(app.api_key_input.is_empty());
    }

    #[test]
    fn model_picker_moves_and_selects() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        handle_key(&mut app, ctrl('o'));
        assert!(app.show_model_picker);

        handle_key(&mut app, press(KeyCode::Down));
        handle_key(&mut app, press(KeyCode::Enter));
        assert_eq!(app.selected_model, app.models[1]);
    }

    #[test]
    fn ctrl_p_toggles_the_preview_pane() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        assert!(app.preview.is_collapsed());
        handle_key(&mut app, ctrl('p'));
        assert!(!app.preview.is_collapsed());
    }

    #[test]
    fn wheel_only_scrolls_inside_the_transcript() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.transcript.clamp_scroll(0);
        app.transcript_area = Some(Rect::new(0, 0, 10, 10));

        let wheel = |column, row| MouseEvent {
            kind: MouseEventKind::ScrollDown,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        };
        handle_mouse(&mut app, wheel(20, 20));
        assert_eq!(app.transcript.scroll(), 0);
        handle_mouse(&mut app, wheel(2, 2));
        assert_eq!(app.transcript.scroll(), WHEEL_LINES);
    }
}
