use std::path::PathBuf;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{App, Focus, InputMode, OutboundSend, SaveRequest, SelectionSaveRequest};
use crate::backend::{BackendClient, BackendEvent};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line editing shared by the composer, the settings input and
/// the upload prompt. Returns true if the key was consumed.
fn edit_line(input: &mut String, cursor: &mut usize, key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(input, *cursor);
                input.remove(byte_pos);
            }
            true
        }
        KeyCode::Delete => {
            if *cursor < input.chars().count() {
                let byte_pos = char_to_byte_index(input, *cursor);
                input.remove(byte_pos);
            }
            true
        }
        KeyCode::Left => {
            *cursor = cursor.saturating_sub(1);
            true
        }
        KeyCode::Right => {
            *cursor = (*cursor + 1).min(input.chars().count());
            true
        }
        KeyCode::Home => {
            *cursor = 0;
            true
        }
        KeyCode::End => {
            *cursor = input.chars().count();
            true
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let byte_pos = char_to_byte_index(input, *cursor);
            input.insert(byte_pos, c);
            *cursor += 1;
            true
        }
        _ => false,
    }
}

/// Kick off the initial session-list fetch on startup.
pub fn bootstrap(app: &mut App) {
    if app.begin_refresh() {
        spawn_refresh(app.backend.clone(), app.sender.clone());
    }
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Backend(backend_event) => app.apply_backend_event(backend_event),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global quit that works in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // Popups take the keyboard first
    if app.show_settings {
        handle_settings_key(app, key);
        return;
    }
    if app.show_upload {
        handle_upload_key(app, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_key(app, key),
        InputMode::Editing => handle_composer_key(app, key),
    }
}

fn handle_settings_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_settings = false;
        }
        KeyCode::Enter => {
            if let Some(candidate) = app.begin_probe() {
                spawn_probe(candidate, app.sender.clone());
            }
        }
        // Repopulate with the default URL without committing it
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.reset_settings_default();
        }
        _ => {
            edit_line(&mut app.settings_input, &mut app.settings_cursor, &key);
        }
    }
}

fn handle_upload_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_upload = false;
        }
        KeyCode::Enter => {
            if let Some(paths) = app.begin_upload() {
                spawn_upload(app.backend.clone(), paths, app.sender.clone());
            }
        }
        _ => {
            edit_line(&mut app.upload_input, &mut app.upload_cursor, &key);
        }
    }
}

fn handle_normal_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => {
            app.should_quit = true;
            return;
        }
        KeyCode::Tab => {
            app.focus = match app.focus {
                Focus::Sidebar => Focus::Thread,
                Focus::Thread => Focus::Composer,
                Focus::Composer => Focus::Sidebar,
            };
            // The composer is always an editing surface
            if app.focus == Focus::Composer {
                app.input_mode = InputMode::Editing;
                app.composer_cursor = app.composer.chars().count();
            }
            return;
        }
        KeyCode::Char('w') => {
            app.toggle_live_search();
            return;
        }
        KeyCode::Char('B') => {
            app.open_settings();
            return;
        }
        KeyCode::Char('u') if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.open_upload();
            return;
        }
        KeyCode::Char('r') => {
            if app.begin_refresh() {
                spawn_refresh(app.backend.clone(), app.sender.clone());
            }
            return;
        }
        KeyCode::Char('n') => {
            if app.begin_create() {
                spawn_create(app.backend.clone(), app.sender.clone());
            }
            return;
        }
        _ => {}
    }

    match app.focus {
        Focus::Sidebar => handle_sidebar_key(app, key),
        Focus::Thread => handle_thread_key(app, key),
        Focus::Composer => match key.code {
            KeyCode::Char('i') | KeyCode::Enter => {
                app.input_mode = InputMode::Editing;
                app.composer_cursor = app.composer.chars().count();
            }
            _ => {}
        },
    }
}

fn handle_sidebar_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.sidebar_down(),
        KeyCode::Char('k') | KeyCode::Up => app.sidebar_up(),
        KeyCode::Enter => {
            app.activate_selected();
            if app.active_idx.is_some() {
                app.focus = Focus::Composer;
                app.input_mode = InputMode::Editing;
                app.composer_cursor = app.composer.chars().count();
            }
        }
        KeyCode::Char('d') => {
            if let Some(id) = app.delete_target() {
                spawn_delete(app.backend.clone(), id, app.sender.clone());
            }
        }
        _ => {}
    }
}

fn handle_thread_key(app: &mut App, key: KeyEvent) {
    // Line-selection mode inside the focused assistant message
    if app.line_select.is_some() {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => app.extend_select_down(),
            KeyCode::Char('k') | KeyCode::Up => app.extend_select_up(),
            KeyCode::Enter => app.capture_line_select(),
            KeyCode::Esc => app.cancel_line_select(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.thread_next(),
        KeyCode::Char('k') | KeyCode::Up => app.thread_prev(),
        KeyCode::Char('g') => {
            if app.active_session().is_some_and(|s| !s.messages.is_empty()) {
                app.thread_cursor = Some(0);
            }
            app.thread_scroll = 0;
        }
        KeyCode::Char('G') => {
            if let Some(last) = app.active_session().map(|s| s.messages.len()) {
                app.thread_cursor = last.checked_sub(1);
            }
            app.scroll_thread_to_bottom();
        }
        KeyCode::Char('v') => app.start_line_select(),
        KeyCode::Char('S') => {
            if let Some(index) = app.thread_cursor {
                if let Some(request) = app.begin_save_response(index) {
                    spawn_save_response(app.backend.clone(), request, app.sender.clone());
                }
            }
        }
        KeyCode::Char('s') => {
            if let Some(request) = app.begin_save_selection() {
                spawn_save_selection(app.backend.clone(), request, app.sender.clone());
            }
        }
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let half = app.thread_height / 2;
            for _ in 0..half {
                app.scroll_thread_down();
            }
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let half = app.thread_height / 2;
            app.thread_scroll = app.thread_scroll.saturating_sub(half);
        }
        _ => {}
    }
}

fn handle_composer_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if let Some(outbound) = app.begin_send() {
                spawn_send(app.backend.clone(), outbound, app.sender.clone());
            }
        }
        _ => {
            edit_line(&mut app.composer, &mut app.composer_cursor, &key);
        }
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_sidebar = app.sidebar_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_thread = app.thread_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_sidebar {
                app.sidebar_down();
            } else if in_thread {
                app.scroll_thread_down();
                app.scroll_thread_down();
                app.scroll_thread_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_sidebar {
                app.sidebar_up();
            } else if in_thread {
                app.scroll_thread_up();
                app.scroll_thread_up();
                app.scroll_thread_up();
            }
        }
        _ => {}
    }
}

// --- spawned backend tasks -------------------------------------------
//
// Fire-and-forget: each task runs the request to completion and reports
// the outcome over the event channel. No cancellation, no retries.

fn spawn_refresh(backend: BackendClient, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let outcome = backend.list_chats().await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::SessionsListed(outcome)));
    });
}

fn spawn_create(backend: BackendClient, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let outcome = backend.create_chat().await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::SessionCreated(outcome)));
    });
}

fn spawn_delete(backend: BackendClient, id: String, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let outcome = backend.delete_chat(&id).await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::SessionDeleted { id, outcome }));
    });
}

fn spawn_send(backend: BackendClient, outbound: OutboundSend, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let OutboundSend { session_id, text, live } = outbound;
        let outcome = if live {
            backend.live_search(&session_id, &text).await
        } else {
            backend.query(&session_id, &text).await
        };
        let _ = tx.send(AppEvent::Backend(BackendEvent::Answered { session_id, outcome }));
    });
}

fn spawn_upload(backend: BackendClient, paths: Vec<PathBuf>, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let outcome = backend.upload_documents(&paths).await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::DocumentsUploaded(outcome)));
    });
}

fn spawn_save_response(backend: BackendClient, request: SaveRequest, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let outcome = backend
            .save_response(&request.key.session_id, request.pair_index)
            .await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::SaveFinished {
            key: request.key,
            outcome,
        }));
    });
}

fn spawn_save_selection(
    backend: BackendClient,
    request: SelectionSaveRequest,
    tx: UnboundedSender<AppEvent>,
) {
    tokio::spawn(async move {
        let outcome = backend
            .save_selection(&request.key.session_id, request.pair_index, &request.text)
            .await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::SaveFinished {
            key: request.key,
            outcome,
        }));
    });
}

/// The probe runs against a throwaway client so a rejected candidate
/// never touches the committed backend.
fn spawn_probe(candidate: String, tx: UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let client = BackendClient::new(&candidate);
        let outcome = client.probe().await;
        let _ = tx.send(AppEvent::Backend(BackendEvent::ProbeFinished {
            url: candidate,
            outcome,
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn plain_characters_insert_at_the_cursor() {
        let mut input = String::from("ac");
        let mut cursor = 1;
        assert!(edit_line(
            &mut input,
            &mut cursor,
            &press(KeyCode::Char('b'), KeyModifiers::NONE),
        ));
        assert_eq!(input, "abc");
        assert_eq!(cursor, 2);
    }

    #[test]
    fn control_chords_do_not_type_into_the_line() {
        let mut input = String::from("ab");
        let mut cursor = 2;
        assert!(!edit_line(
            &mut input,
            &mut cursor,
            &press(KeyCode::Char('r'), KeyModifiers::CONTROL),
        ));
        assert_eq!(input, "ab");
        assert_eq!(cursor, 2);
    }

    #[test]
    fn backspace_removes_the_char_before_a_multibyte_cursor() {
        let mut input = String::from("héllo");
        let mut cursor = 2;
        assert!(edit_line(
            &mut input,
            &mut cursor,
            &press(KeyCode::Backspace, KeyModifiers::NONE),
        ));
        assert_eq!(input, "hllo");
        assert_eq!(cursor, 1);
    }
}
