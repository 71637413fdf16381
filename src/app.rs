use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;

use crate::backend::{BackendClient, BackendEvent};
use crate::config::{Config, DEFAULT_BACKEND_URL, normalize_url};
use crate::session::{
    Message, MessageIds, PendingKey, Role, SaveOp, Selection, Session, SessionState, pair_index,
};
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Sidebar,
    Thread,
    Composer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient toast. Pruned on tick once it has been visible long
/// enough.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub body: String,
    pub at: Instant,
}

const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Line-range visual selection inside the focused assistant message.
#[derive(Debug, Clone, Copy)]
pub struct LineSelect {
    pub anchor: usize,
    pub cursor: usize,
}

impl LineSelect {
    pub fn range(&self) -> (usize, usize) {
        (self.anchor.min(self.cursor), self.anchor.max(self.cursor))
    }
}

/// Everything a send needs once the guards have passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSend {
    pub session_id: String,
    pub text: String,
    pub live: bool,
}

#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub key: PendingKey,
    pub pair_index: usize,
}

#[derive(Debug, Clone)]
pub struct SelectionSaveRequest {
    pub key: PendingKey,
    pub pair_index: usize,
    pub text: String,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub focus: Focus,
    pub input_mode: InputMode,

    // Sessions
    pub sessions: Vec<Session>,
    pub active_idx: Option<usize>,
    pub sidebar_state: ListState,
    message_ids: MessageIds,

    // Composer
    pub composer: String,
    pub composer_cursor: usize,
    pub live_search: bool,

    // Thread view
    pub thread_cursor: Option<usize>,
    pub thread_scroll: u16,
    pub thread_height: u16,
    pub thread_width: u16,
    pub total_thread_lines: u16,
    pub line_select: Option<LineSelect>,
    pub selection: Option<Selection>,

    // In-flight guards
    pub refresh_in_flight: bool,
    pub create_in_flight: bool,
    pub send_in_flight: bool,
    pub pending_saves: HashSet<PendingKey>,

    // Notices and animation
    pub notices: Vec<Notice>,
    pub animation_frame: u8,

    // Backend settings popup
    pub show_settings: bool,
    pub settings_input: String,
    pub settings_cursor: usize,
    pub settings_testing: bool,
    pub settings_error: Option<String>,

    // Upload prompt
    pub show_upload: bool,
    pub upload_input: String,
    pub upload_cursor: usize,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub thread_area: Option<Rect>,

    // Backend
    pub backend: BackendClient,
    pub sender: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(sender: UnboundedSender<AppEvent>) -> Self {
        // A previously validated URL is adopted without re-probing.
        let config = Config::load().unwrap_or_default();
        let url = config
            .backend_url
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        Self::with_backend_url(sender, url)
    }

    pub fn with_backend_url(sender: UnboundedSender<AppEvent>, url: String) -> Self {
        Self {
            should_quit: false,
            focus: Focus::Sidebar,
            input_mode: InputMode::Normal,

            sessions: Vec::new(),
            active_idx: None,
            sidebar_state: ListState::default(),
            message_ids: MessageIds::default(),

            composer: String::new(),
            composer_cursor: 0,
            live_search: false,

            thread_cursor: None,
            thread_scroll: 0,
            thread_height: 0,
            thread_width: 0,
            total_thread_lines: 0,
            line_select: None,
            selection: None,

            refresh_in_flight: false,
            create_in_flight: false,
            send_in_flight: false,
            pending_saves: HashSet::new(),

            notices: Vec::new(),
            animation_frame: 0,

            show_settings: false,
            settings_input: String::new(),
            settings_cursor: 0,
            settings_testing: false,
            settings_error: None,

            show_upload: false,
            upload_input: String::new(),
            upload_cursor: 0,

            sidebar_area: None,
            thread_area: None,

            backend: BackendClient::new(&url),
            sender,
        }
    }

    // --- notices -----------------------------------------------------

    pub fn notify(&mut self, level: NoticeLevel, title: &str, body: impl Into<String>) {
        self.notices.push(Notice {
            level,
            title: title.to_string(),
            body: body.into(),
            at: Instant::now(),
        });
    }

    pub fn current_notice(&self) -> Option<&Notice> {
        self.notices.last()
    }

    /// Tick: advance the loading animation and expire old notices.
    pub fn tick(&mut self) {
        if self.send_in_flight {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        let now = Instant::now();
        self.notices.retain(|n| now.duration_since(n.at) < NOTICE_TTL);
    }

    // --- session access ----------------------------------------------

    pub fn active_session(&self) -> Option<&Session> {
        self.active_idx.and_then(|i| self.sessions.get(i))
    }

    fn active_session_mut(&mut self) -> Option<&mut Session> {
        self.active_idx.and_then(|i| self.sessions.get_mut(i))
    }

    // --- sidebar navigation ------------------------------------------

    pub fn sidebar_down(&mut self) {
        let len = self.sessions.len();
        if len > 0 {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn sidebar_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    /// `listed -> active` on user selection. No message backfill: the
    /// backend exposes no history endpoint, so a freshly activated
    /// session renders empty until new messages arrive.
    pub fn activate_selected(&mut self) {
        let Some(i) = self.sidebar_state.selected() else {
            return;
        };
        if i >= self.sessions.len() {
            return;
        }
        if let Some(prev) = self.active_idx {
            if let Some(session) = self.sessions.get_mut(prev) {
                session.state = SessionState::Listed;
            }
        }
        self.sessions[i].state = SessionState::Active;
        self.active_idx = Some(i);
        self.thread_cursor = self.sessions[i].messages.len().checked_sub(1);
        self.line_select = None;
        self.selection = None;
        self.scroll_thread_to_bottom();
    }

    // --- thread navigation and selection -----------------------------

    pub fn thread_next(&mut self) {
        let len = self.active_session().map_or(0, |s| s.messages.len());
        if len > 0 {
            let i = self.thread_cursor.unwrap_or(0);
            self.thread_cursor = Some((i + 1).min(len - 1));
        }
    }

    pub fn thread_prev(&mut self) {
        if let Some(i) = self.thread_cursor {
            self.thread_cursor = Some(i.saturating_sub(1));
        } else if self.active_session().is_some_and(|s| !s.messages.is_empty()) {
            self.thread_cursor = Some(0);
        }
    }

    pub fn focused_message(&self) -> Option<(usize, &Message)> {
        let idx = self.thread_cursor?;
        let message = self.active_session()?.messages.get(idx)?;
        Some((idx, message))
    }

    /// Start a line selection inside the focused message. Only
    /// assistant messages can be selected from.
    pub fn start_line_select(&mut self) {
        let Some((_, message)) = self.focused_message() else {
            return;
        };
        if !message.savable() {
            self.notify(
                NoticeLevel::Info,
                "Not selectable",
                "Only assistant responses can be saved",
            );
            return;
        }
        self.line_select = Some(LineSelect { anchor: 0, cursor: 0 });
    }

    pub fn extend_select_down(&mut self) {
        let lines = self
            .focused_message()
            .map_or(0, |(_, m)| m.content.lines().count());
        if let Some(select) = self.line_select.as_mut() {
            if lines > 0 {
                select.cursor = (select.cursor + 1).min(lines - 1);
            }
        }
    }

    pub fn extend_select_up(&mut self) {
        if let Some(select) = self.line_select.as_mut() {
            select.cursor = select.cursor.saturating_sub(1);
        }
    }

    /// Capture the highlighted lines as the selection snapshot and
    /// leave selection mode.
    pub fn capture_line_select(&mut self) {
        let Some(select) = self.line_select.take() else {
            return;
        };
        let Some((idx, message)) = self.focused_message() else {
            return;
        };
        let (start, end) = select.range();
        let text: String = message
            .content
            .lines()
            .skip(start)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n");
        self.capture_selection(idx, &text);
        if self.selection.is_some() {
            self.notify(NoticeLevel::Info, "Selection captured", "Press s to save it");
        }
    }

    pub fn cancel_line_select(&mut self) {
        self.line_select = None;
        self.selection = None;
    }

    /// Store (or clear) the one selection snapshot. Advisory UI state,
    /// not a backend call.
    pub fn capture_selection(&mut self, message_index: usize, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.selection = None;
        } else {
            self.selection = Some(Selection {
                message_index,
                text: trimmed.to_string(),
            });
        }
    }

    // --- operation guards (pure; spawning happens in the handler) ----

    pub fn begin_refresh(&mut self) -> bool {
        if self.refresh_in_flight {
            return false;
        }
        self.refresh_in_flight = true;
        true
    }

    pub fn begin_create(&mut self) -> bool {
        if self.create_in_flight {
            return false;
        }
        self.create_in_flight = true;
        true
    }

    /// Id of the sidebar-selected session, for deletion. Nothing is
    /// removed locally until the backend confirms.
    pub fn delete_target(&self) -> Option<String> {
        self.sidebar_state
            .selected()
            .and_then(|i| self.sessions.get(i))
            .map(|s| s.id.clone())
    }

    /// Guard and optimistic half of a send: blank input, no active
    /// session, or a send already in flight are silent no-ops (the
    /// missing-session case gets a notice). The user message is
    /// appended and the composer cleared before the backend answers.
    pub fn begin_send(&mut self) -> Option<OutboundSend> {
        let text = self.composer.trim().to_string();
        if text.is_empty() {
            return None;
        }
        if self.send_in_flight {
            return None;
        }
        let Some(idx) = self.active_idx else {
            self.notify(
                NoticeLevel::Error,
                "No conversation",
                "Create (n) or select a conversation first",
            );
            return None;
        };

        self.composer.clear();
        self.composer_cursor = 0;

        let id = self.message_ids.next();
        let session = &mut self.sessions[idx];
        session.messages.push(Message::new(id, Role::User, text.clone()));
        self.thread_cursor = Some(session.messages.len() - 1);
        let session_id = session.id.clone();

        self.send_in_flight = true;
        self.scroll_thread_to_bottom();

        Some(OutboundSend {
            session_id,
            text,
            live: self.live_search,
        })
    }

    /// Guard for saving a full assistant response. A duplicate while
    /// the first request is in flight is dropped silently.
    pub fn begin_save_response(&mut self, message_index: usize) -> Option<SaveRequest> {
        let session = self.active_session()?;
        let message = session.messages.get(message_index)?;
        if !message.savable() {
            return None;
        }
        let key = PendingKey {
            session_id: session.id.clone(),
            message_index,
            op: SaveOp::FullResponse,
        };
        if !self.pending_saves.insert(key.clone()) {
            return None;
        }
        Some(SaveRequest {
            key,
            pair_index: pair_index(message_index),
        })
    }

    /// Guard for saving the captured fragment. Same pending-key
    /// pattern as a full-response save, including the savability check
    /// on the message the fragment came from; the snapshot stays put
    /// until the save succeeds.
    pub fn begin_save_selection(&mut self) -> Option<SelectionSaveRequest> {
        let selection = self.selection.clone()?;
        let session = self.active_session()?;
        let message = session.messages.get(selection.message_index)?;
        if !message.savable() {
            return None;
        }
        let key = PendingKey {
            session_id: session.id.clone(),
            message_index: selection.message_index,
            op: SaveOp::Fragment,
        };
        if !self.pending_saves.insert(key.clone()) {
            return None;
        }
        Some(SelectionSaveRequest {
            key,
            pair_index: pair_index(selection.message_index),
            text: selection.text,
        })
    }

    pub fn save_pending(&self, message_index: usize, op: SaveOp) -> bool {
        self.active_session().is_some_and(|session| {
            self.pending_saves.contains(&PendingKey {
                session_id: session.id.clone(),
                message_index,
                op,
            })
        })
    }

    pub fn toggle_live_search(&mut self) {
        self.live_search = !self.live_search;
    }

    // --- settings popup ----------------------------------------------

    pub fn open_settings(&mut self) {
        self.show_settings = true;
        self.settings_input = self.backend.base_url().to_string();
        self.settings_cursor = self.settings_input.chars().count();
        self.settings_error = None;
    }

    /// Validate the candidate and mark the probe in flight. `None`
    /// means nothing should be spawned.
    pub fn begin_probe(&mut self) -> Option<String> {
        if self.settings_testing {
            return None;
        }
        match normalize_url(&self.settings_input) {
            None => {
                self.settings_error = Some("Enter a backend URL".to_string());
                None
            }
            Some(candidate) => {
                self.settings_testing = true;
                self.settings_error = None;
                Some(candidate)
            }
        }
    }

    pub fn reset_settings_default(&mut self) {
        self.settings_input = DEFAULT_BACKEND_URL.to_string();
        self.settings_cursor = self.settings_input.chars().count();
        self.settings_error = None;
    }

    /// Adopt a probe-validated URL as the live backend and close the
    /// dialog. Persistence is handled by the caller.
    pub fn commit_backend_url(&mut self, url: &str) {
        self.backend = BackendClient::new(url);
        self.show_settings = false;
        self.settings_error = None;
        self.notify(NoticeLevel::Success, "Connected", url.to_string());
    }

    // --- upload prompt -----------------------------------------------

    pub fn open_upload(&mut self) {
        self.show_upload = true;
        self.upload_input.clear();
        self.upload_cursor = 0;
    }

    /// Parse the upload prompt into paths. Empty input is a no-op.
    pub fn begin_upload(&mut self) -> Option<Vec<PathBuf>> {
        let paths: Vec<PathBuf> = self
            .upload_input
            .split_whitespace()
            .map(PathBuf::from)
            .collect();
        if paths.is_empty() {
            return None;
        }
        self.show_upload = false;
        Some(paths)
    }

    // --- backend completions -----------------------------------------

    pub fn apply_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::SessionsListed(outcome) => self.apply_sessions_listed(outcome),
            BackendEvent::SessionCreated(outcome) => self.apply_session_created(outcome),
            BackendEvent::SessionDeleted { id, outcome } => self.apply_session_deleted(id, outcome),
            BackendEvent::Answered { session_id, outcome } => self.apply_answered(session_id, outcome),
            BackendEvent::DocumentsUploaded(outcome) => match outcome {
                Ok(message) => self.notify(
                    NoticeLevel::Success,
                    "Documents uploaded",
                    message.unwrap_or_else(|| "Indexed into the knowledge base".to_string()),
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "upload failed");
                    self.notify(NoticeLevel::Error, "Upload failed", format!("{e:#}"));
                }
            },
            BackendEvent::SaveFinished { key, outcome } => self.apply_save_finished(key, outcome),
            BackendEvent::ProbeFinished { url, outcome } => self.apply_probe_finished(url, outcome),
        }
    }

    fn apply_sessions_listed(&mut self, outcome: anyhow::Result<Vec<String>>) {
        self.refresh_in_flight = false;
        match outcome {
            Ok(ids) => {
                let old = std::mem::take(&mut self.sessions);
                let active_id = self
                    .active_idx
                    .and_then(|i| old.get(i))
                    .map(|s| s.id.clone());
                let mut old_by_id: HashMap<String, Session> =
                    old.into_iter().map(|s| (s.id.clone(), s)).collect();

                // Histories survive only for ids the backend re-confirmed.
                self.sessions = ids
                    .into_iter()
                    .enumerate()
                    .map(|(n, id)| {
                        let title = format!("Conversation {}", n + 1);
                        match old_by_id.remove(&id) {
                            Some(mut session) => {
                                session.title = title;
                                session.state = SessionState::Listed;
                                session
                            }
                            None => Session::listed(id, title),
                        }
                    })
                    .collect();

                self.active_idx = active_id
                    .and_then(|id| self.sessions.iter().position(|s| s.id == id));
                match self.active_idx {
                    Some(i) => {
                        self.sessions[i].state = SessionState::Active;
                        self.sidebar_state.select(Some(i));
                    }
                    None => {
                        self.thread_cursor = None;
                        self.sidebar_state
                            .select(if self.sessions.is_empty() { None } else { Some(0) });
                    }
                }
            }
            Err(e) => {
                // A backend with no conversations yet is a valid cold
                // start, not a failure.
                tracing::warn!(error = %e, "session list refresh failed");
                self.sessions.clear();
                self.active_idx = None;
                self.thread_cursor = None;
                self.sidebar_state.select(None);
                self.notify(
                    NoticeLevel::Info,
                    "No conversations",
                    "The backend returned no conversations",
                );
            }
        }
    }

    fn apply_session_created(&mut self, outcome: anyhow::Result<String>) {
        self.create_in_flight = false;
        match outcome {
            Ok(chat_id) => {
                if let Some(prev) = self.active_idx {
                    if let Some(session) = self.sessions.get_mut(prev) {
                        session.state = SessionState::Listed;
                    }
                }
                let title = format!("Conversation {}", self.sessions.len() + 1);
                let mut session = Session::listed(chat_id, title);
                session.state = SessionState::Active;
                self.sessions.push(session);
                let idx = self.sessions.len() - 1;
                self.active_idx = Some(idx);
                self.sidebar_state.select(Some(idx));
                self.thread_cursor = None;
                self.line_select = None;
                self.selection = None;
                self.notify(NoticeLevel::Success, "Conversation created", "");
            }
            Err(e) => {
                tracing::warn!(error = %e, "create conversation failed");
                self.notify(
                    NoticeLevel::Error,
                    "Couldn't create conversation",
                    format!("{e:#}. Check the backend URL under settings (B)"),
                );
            }
        }
    }

    fn apply_session_deleted(&mut self, id: String, outcome: anyhow::Result<()>) {
        match outcome {
            Ok(()) => {
                let Some(pos) = self.sessions.iter().position(|s| s.id == id) else {
                    return;
                };
                self.sessions.remove(pos);
                self.pending_saves.retain(|key| key.session_id != id);
                match self.active_idx {
                    Some(a) if a == pos => {
                        self.active_idx = None;
                        self.thread_cursor = None;
                        self.line_select = None;
                        self.selection = None;
                    }
                    Some(a) if a > pos => self.active_idx = Some(a - 1),
                    _ => {}
                }
                if self.sessions.is_empty() {
                    self.sidebar_state.select(None);
                } else if let Some(i) = self.sidebar_state.selected() {
                    self.sidebar_state.select(Some(i.min(self.sessions.len() - 1)));
                }
                self.notify(NoticeLevel::Success, "Conversation deleted", "");
            }
            Err(e) => {
                tracing::warn!(error = %e, chat = %id, "delete failed");
                self.notify(NoticeLevel::Error, "Couldn't delete conversation", format!("{e:#}"));
            }
        }
    }

    fn apply_answered(&mut self, session_id: String, outcome: anyhow::Result<String>) {
        self.send_in_flight = false;
        match outcome {
            Ok(text) => {
                // The session may have been deleted or dropped by a
                // refresh while the request was out; the answer is
                // discarded then.
                let Some(pos) = self.sessions.iter().position(|s| s.id == session_id) else {
                    return;
                };
                let id = self.message_ids.next();
                self.sessions[pos]
                    .messages
                    .push(Message::new(id, Role::Assistant, text));
                if self.active_idx == Some(pos) {
                    self.thread_cursor = Some(self.sessions[pos].messages.len() - 1);
                    self.scroll_thread_to_bottom();
                }
            }
            Err(e) => {
                // The optimistic user message stays; re-sending it is
                // the retry path.
                tracing::warn!(error = %e, chat = %session_id, "query failed");
                self.notify(NoticeLevel::Error, "Message failed", format!("{e:#}"));
            }
        }
    }

    fn apply_save_finished(&mut self, key: PendingKey, outcome: anyhow::Result<Option<String>>) {
        self.pending_saves.remove(&key);
        match outcome {
            Ok(message) => {
                if key.op == SaveOp::Fragment {
                    self.selection = None;
                }
                let fallback = match key.op {
                    SaveOp::FullResponse => "Response saved to the knowledge base",
                    SaveOp::Fragment => "Selection saved to the knowledge base",
                };
                self.notify(
                    NoticeLevel::Success,
                    "Saved",
                    message.unwrap_or_else(|| fallback.to_string()),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "save failed");
                self.notify(NoticeLevel::Error, "Save failed", format!("{e:#}"));
            }
        }
    }

    fn apply_probe_finished(
        &mut self,
        url: String,
        outcome: Result<(), crate::backend::ProbeFailure>,
    ) {
        self.settings_testing = false;
        match outcome {
            Ok(()) => {
                if let Err(e) = Config::save_backend_url(&url) {
                    tracing::warn!(error = %e, "could not persist backend URL");
                }
                self.commit_backend_url(&url);
            }
            Err(failure) => {
                tracing::warn!(%url, ?failure, "probe rejected candidate");
                self.settings_error = Some(failure.describe());
            }
        }
    }

    // --- thread scroll -----------------------------------------------

    pub fn scroll_thread_up(&mut self) {
        self.thread_scroll = self.thread_scroll.saturating_sub(1);
    }

    pub fn scroll_thread_down(&mut self) {
        let max = self
            .total_thread_lines
            .saturating_sub(self.thread_height);
        if self.thread_scroll < max {
            self.thread_scroll += 1;
        }
    }

    /// Scroll so the newest message (and the typing indicator) is
    /// visible. Uses the last rendered thread dimensions.
    pub fn scroll_thread_to_bottom(&mut self) {
        let wrap_width = if self.thread_width > 0 {
            self.thread_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        if let Some(session) = self.active_session() {
            for message in &session.messages {
                total_lines += 1; // role line
                for line in message.content.lines() {
                    let char_count = line.chars().count();
                    if char_count == 0 {
                        total_lines += 1;
                    } else {
                        total_lines += ((char_count / wrap_width) + 1) as u16;
                    }
                }
                total_lines += 1; // blank line after message
            }
        }
        total_lines += 2; // typing indicator

        let visible = if self.thread_height > 0 {
            self.thread_height
        } else {
            20
        };
        self.thread_scroll = total_lines.saturating_sub(visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProbeFailure;
    use anyhow::anyhow;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_app() -> App {
        let (tx, _rx) = unbounded_channel();
        App::with_backend_url(tx, "http://test.local".to_string())
    }

    fn app_with_session(id: &str) -> App {
        let mut app = test_app();
        app.apply_backend_event(BackendEvent::SessionCreated(Ok(id.to_string())));
        app
    }

    fn send(app: &mut App, text: &str) -> Option<OutboundSend> {
        app.composer = text.to_string();
        app.begin_send()
    }

    #[test]
    fn each_successful_create_appends_a_unique_session() {
        let mut app = test_app();
        for id in ["a", "b", "c"] {
            app.apply_backend_event(BackendEvent::SessionCreated(Ok(id.to_string())));
        }
        assert_eq!(app.sessions.len(), 3);
        let ids: Vec<&str> = app.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(app.active_idx, Some(2));
        assert!(app.sessions[2].is_active());
        assert!(!app.sessions[0].is_active());
    }

    #[test]
    fn deleting_the_active_session_clears_the_selection() {
        let mut app = app_with_session("abc");
        app.apply_backend_event(BackendEvent::SessionDeleted {
            id: "abc".to_string(),
            outcome: Ok(()),
        });
        assert!(app.sessions.is_empty());
        assert_eq!(app.active_idx, None);
    }

    #[test]
    fn deleting_another_session_keeps_the_active_one() {
        let mut app = test_app();
        app.apply_backend_event(BackendEvent::SessionCreated(Ok("a".to_string())));
        app.apply_backend_event(BackendEvent::SessionCreated(Ok("b".to_string())));
        app.apply_backend_event(BackendEvent::SessionDeleted {
            id: "a".to_string(),
            outcome: Ok(()),
        });
        assert_eq!(app.active_session().unwrap().id, "b");
    }

    #[test]
    fn failed_delete_leaves_local_state_untouched() {
        let mut app = app_with_session("abc");
        app.apply_backend_event(BackendEvent::SessionDeleted {
            id: "abc".to_string(),
            outcome: Err(anyhow!("boom")),
        });
        assert_eq!(app.sessions.len(), 1);
        assert_eq!(app.active_idx, Some(0));
        assert_eq!(app.current_notice().unwrap().level, NoticeLevel::Error);
    }

    #[test]
    fn duplicate_save_is_suppressed_while_pending() {
        let mut app = app_with_session("abc");
        send(&mut app, "hi").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Ok("hello".to_string()),
        });

        let first = app.begin_save_response(1);
        assert!(first.is_some());
        assert!(app.begin_save_response(1).is_none());

        app.apply_backend_event(BackendEvent::SaveFinished {
            key: first.unwrap().key,
            outcome: Ok(None),
        });
        assert!(app.begin_save_response(1).is_some());
    }

    #[test]
    fn user_messages_are_not_savable() {
        let mut app = app_with_session("abc");
        send(&mut app, "hi").unwrap();
        assert!(app.begin_save_response(0).is_none());
    }

    #[test]
    fn save_request_carries_the_pair_index() {
        let mut app = app_with_session("abc");
        for round in 0..3 {
            send(&mut app, "q").unwrap();
            app.apply_backend_event(BackendEvent::Answered {
                session_id: "abc".to_string(),
                outcome: Ok(format!("a{round}")),
            });
        }
        // assistant messages sit at odd positions 1, 3, 5
        for (message_index, want) in [(1, 0), (3, 1), (5, 2)] {
            let request = app.begin_save_response(message_index).unwrap();
            assert_eq!(request.pair_index, want);
        }
    }

    #[test]
    fn blank_send_is_a_no_op() {
        let mut app = app_with_session("abc");
        assert!(send(&mut app, "").is_none());
        assert!(send(&mut app, "   ").is_none());
        assert!(app.active_session().unwrap().messages.is_empty());
        assert!(!app.send_in_flight);
    }

    #[test]
    fn send_without_active_session_is_a_no_op() {
        let mut app = test_app();
        assert!(send(&mut app, "hello").is_none());
    }

    #[test]
    fn second_send_is_dropped_while_one_is_in_flight() {
        let mut app = app_with_session("abc");
        assert!(send(&mut app, "one").is_some());
        assert!(send(&mut app, "two").is_none());
        assert_eq!(app.active_session().unwrap().messages.len(), 1);
    }

    #[test]
    fn failed_refresh_resets_to_empty_with_an_info_notice() {
        let mut app = app_with_session("abc");
        app.begin_refresh();
        app.apply_backend_event(BackendEvent::SessionsListed(Err(anyhow!("network down"))));
        assert!(app.sessions.is_empty());
        assert_eq!(app.active_idx, None);
        assert_eq!(app.current_notice().unwrap().level, NoticeLevel::Info);
        assert!(!app.refresh_in_flight);
    }

    #[test]
    fn refresh_is_not_reentrant() {
        let mut app = test_app();
        assert!(app.begin_refresh());
        assert!(!app.begin_refresh());
    }

    #[test]
    fn refresh_keeps_histories_of_confirmed_sessions() {
        let mut app = app_with_session("abc");
        send(&mut app, "Hello").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Ok("Hi there".to_string()),
        });

        app.apply_backend_event(BackendEvent::SessionsListed(Ok(vec![
            "abc".to_string(),
            "xyz".to_string(),
        ])));
        assert_eq!(app.sessions.len(), 2);
        assert_eq!(app.sessions[0].messages.len(), 2);
        assert_eq!(app.sessions[0].title, "Conversation 1");
        assert_eq!(app.active_session().unwrap().id, "abc");

        // a second refresh without "abc" drops its history
        app.apply_backend_event(BackendEvent::SessionsListed(Ok(vec!["xyz".to_string()])));
        assert_eq!(app.sessions.len(), 1);
        assert!(app.sessions[0].messages.is_empty());
        assert_eq!(app.active_idx, None);
    }

    #[test]
    fn standard_send_round_trip_appends_in_order() {
        let mut app = app_with_session("abc");
        let outbound = send(&mut app, "Hello").unwrap();
        assert_eq!(
            outbound,
            OutboundSend {
                session_id: "abc".to_string(),
                text: "Hello".to_string(),
                live: false,
            }
        );
        assert!(app.composer.is_empty());

        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Ok("Hi there".to_string()),
        });

        let messages = &app.active_session().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
    }

    #[test]
    fn live_search_mode_is_carried_on_the_outbound_send() {
        let mut app = app_with_session("abc");
        app.toggle_live_search();
        let outbound = send(&mut app, "weather today").unwrap();
        assert!(outbound.live);
        assert_eq!(outbound.text, "weather today");
    }

    #[test]
    fn send_failure_keeps_user_message() {
        let mut app = app_with_session("abc");
        send(&mut app, "Hello").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Err(anyhow!("503")),
        });

        let messages = &app.active_session().unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello");
        assert!(!app.send_in_flight);
        assert_eq!(app.current_notice().unwrap().level, NoticeLevel::Error);
    }

    #[test]
    fn activation_does_not_backfill_messages() {
        let mut app = test_app();
        app.apply_backend_event(BackendEvent::SessionsListed(Ok(vec![
            "a".to_string(),
            "b".to_string(),
        ])));
        app.sidebar_state.select(Some(1));
        app.activate_selected();
        let session = app.active_session().unwrap();
        assert_eq!(session.id, "b");
        assert!(session.is_active());
        assert!(session.messages.is_empty());
    }

    #[test]
    fn probe_failure_leaves_the_committed_url_unchanged() {
        let mut app = test_app();
        app.open_settings();
        app.settings_input = "https://x.test/".to_string();
        let candidate = app.begin_probe().unwrap();
        assert_eq!(candidate, "https://x.test");
        assert!(app.settings_testing);

        app.apply_backend_event(BackendEvent::ProbeFinished {
            url: candidate,
            outcome: Err(ProbeFailure::Shape),
        });
        assert_eq!(app.backend.base_url(), "http://test.local");
        assert!(app.show_settings);
        assert!(app.settings_error.is_some());
        assert!(!app.settings_testing);
    }

    #[test]
    fn empty_candidate_is_rejected_without_a_probe() {
        let mut app = test_app();
        app.open_settings();
        app.settings_input = "   ".to_string();
        assert!(app.begin_probe().is_none());
        assert!(app.settings_error.is_some());
        assert!(!app.settings_testing);
    }

    #[test]
    fn commit_swaps_the_live_backend_and_closes_the_dialog() {
        let mut app = test_app();
        app.open_settings();
        app.commit_backend_url("https://x.test");
        assert_eq!(app.backend.base_url(), "https://x.test");
        assert!(!app.show_settings);
        assert_eq!(app.current_notice().unwrap().level, NoticeLevel::Success);
    }

    #[test]
    fn capture_selection_trims_and_clears_on_empty() {
        let mut app = test_app();
        app.capture_selection(3, "  a fragment  ");
        let selection = app.selection.as_ref().unwrap();
        assert_eq!(selection.message_index, 3);
        assert_eq!(selection.text, "a fragment");

        app.capture_selection(3, "   ");
        assert!(app.selection.is_none());
    }

    #[test]
    fn selection_snapshot_survives_a_failed_save() {
        let mut app = app_with_session("abc");
        send(&mut app, "q").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Ok("line one\nline two".to_string()),
        });
        app.capture_selection(1, "line one");

        let request = app.begin_save_selection().unwrap();
        assert_eq!(request.pair_index, 0);
        app.apply_backend_event(BackendEvent::SaveFinished {
            key: request.key,
            outcome: Err(anyhow!("500")),
        });
        assert!(app.selection.is_some(), "retry must not need a re-select");

        let request = app.begin_save_selection().unwrap();
        app.apply_backend_event(BackendEvent::SaveFinished {
            key: request.key,
            outcome: Ok(Some("stored".to_string())),
        });
        assert!(app.selection.is_none());
    }

    #[test]
    fn stale_selection_does_not_save_into_a_new_session() {
        let mut app = app_with_session("a");
        send(&mut app, "q").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "a".to_string(),
            outcome: Ok("keep this".to_string()),
        });
        app.capture_selection(1, "keep this");

        // creating a session activates it; the old snapshot must not
        // ride along into the empty thread
        app.apply_backend_event(BackendEvent::SessionCreated(Ok("b".to_string())));
        assert!(app.selection.is_none());
        assert!(app.begin_save_selection().is_none());
        assert!(app.pending_saves.is_empty());
    }

    #[test]
    fn selection_guard_requires_a_savable_message_at_its_index() {
        let mut app = app_with_session("a");
        send(&mut app, "mine").unwrap();

        // points at a user message
        app.selection = Some(Selection {
            message_index: 0,
            text: "mine".to_string(),
        });
        assert!(app.begin_save_selection().is_none());

        // points past the end of the thread
        app.selection = Some(Selection {
            message_index: 5,
            text: "gone".to_string(),
        });
        assert!(app.begin_save_selection().is_none());
        assert!(app.pending_saves.is_empty());
    }

    #[test]
    fn line_select_captures_the_highlighted_range() {
        let mut app = app_with_session("abc");
        send(&mut app, "q").unwrap();
        app.apply_backend_event(BackendEvent::Answered {
            session_id: "abc".to_string(),
            outcome: Ok("first\nsecond\nthird".to_string()),
        });
        app.thread_cursor = Some(1);
        app.start_line_select();
        app.extend_select_down();
        app.capture_line_select();

        let selection = app.selection.as_ref().unwrap();
        assert_eq!(selection.message_index, 1);
        assert_eq!(selection.text, "first\nsecond");
    }

    #[test]
    fn line_select_refuses_user_messages() {
        let mut app = app_with_session("abc");
        send(&mut app, "mine").unwrap();
        app.thread_cursor = Some(0);
        app.start_line_select();
        assert!(app.line_select.is_none());
    }

    #[test]
    fn upload_prompt_with_no_paths_is_a_no_op() {
        let mut app = test_app();
        app.open_upload();
        app.upload_input = "   ".to_string();
        assert!(app.begin_upload().is_none());
        assert!(app.show_upload);

        app.upload_input = "notes.pdf handbook.md".to_string();
        let paths = app.begin_upload().unwrap();
        assert_eq!(paths.len(), 2);
        assert!(!app.show_upload);
    }

    #[test]
    fn notices_expire_on_tick() {
        let mut app = test_app();
        app.notify(NoticeLevel::Info, "hi", "");
        app.notices[0].at = Instant::now() - Duration::from_secs(6);
        app.tick();
        assert!(app.current_notice().is_none());
    }
}
