use chrono::{DateTime, Local};

/// The origin of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A single message in a conversation. Immutable once pushed.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub sent_at: DateTime<Local>,
}

impl Message {
    pub fn new(id: u64, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            sent_at: Local::now(),
        }
    }

    /// Only assistant responses can be saved back to the knowledge base.
    pub fn savable(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Allocator for locally generated message ids. Strictly monotonic
/// within a process, which is all the backend sync ever relies on.
#[derive(Debug, Default)]
pub struct MessageIds(u64);

impl MessageIds {
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// Lifecycle of a session as the client sees it. A deleted session is
/// simply dropped from the session list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Known to exist on the backend; messages not fetched.
    Listed,
    /// Selected by the user; its thread is rendered.
    Active,
}

/// A conversation. The id is opaque and issued by the backend; the
/// title is a local placeholder. Messages are strictly append-only.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub state: SessionState,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn listed(id: String, title: String) -> Self {
        Self {
            id,
            title,
            state: SessionState::Listed,
            messages: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// The backend stores conversations as user/assistant pairs, so the
/// pair index for the message at local position `i` is `i / 2` in the
/// strictly alternating sequence the thread renders.
pub fn pair_index(message_index: usize) -> usize {
    message_index / 2
}

/// Which save operation a pending key guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveOp {
    FullResponse,
    Fragment,
}

/// Typed key for the in-flight save guard: one outstanding request per
/// (session, message, operation) at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub session_id: String,
    pub message_index: usize,
    pub op: SaveOp,
}

/// The one captured text fragment, tagged with the message it came
/// from. Replaced on each new capture; cleared after a successful
/// fragment save.
#[derive(Debug, Clone)]
pub struct Selection {
    pub message_index: usize,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_index_halves_message_position() {
        let expected = [0, 0, 1, 1, 2, 2];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(pair_index(i), *want);
        }
    }

    #[test]
    fn only_assistant_messages_are_savable() {
        let user = Message::new(1, Role::User, "hi".into());
        let assistant = Message::new(2, Role::Assistant, "hello".into());
        assert!(!user.savable());
        assert!(assistant.savable());
    }

    #[test]
    fn message_ids_are_monotonic() {
        let mut ids = MessageIds::default();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn pending_keys_distinguish_operation_kinds() {
        let full = PendingKey {
            session_id: "abc".into(),
            message_index: 1,
            op: SaveOp::FullResponse,
        };
        let fragment = PendingKey {
            session_id: "abc".into(),
            message_index: 1,
            op: SaveOp::Fragment,
        };
        assert_ne!(full, fragment);

        let mut pending = std::collections::HashSet::new();
        assert!(pending.insert(full.clone()));
        assert!(pending.insert(fragment));
        assert!(!pending.insert(full));
    }
}
