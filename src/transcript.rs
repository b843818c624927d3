//! Turns streamed transcription deltas into finalized per-turn messages.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct MessageId(u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized transcript entry. Only the translation may be attached later.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    translation: Option<String>,
}

impl Message {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn translation(&self) -> Option<&str> {
        self.translation.as_deref()
    }

    pub fn attach_translation(&mut self, translation: String) {
        self.translation = Some(translation);
    }
}

/// Per-channel accumulators. Each is append-only until a turn completes.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    pending_user: String,
    pending_assistant: String,
    next_id: u64,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_user_delta(&mut self, text: &str) {
        self.pending_user.push_str(text);
    }

    pub fn on_assistant_delta(&mut self, text: &str) {
        self.pending_assistant.push_str(text);
    }

    pub fn pending_user(&self) -> &str {
        &self.pending_user
    }

    pub fn pending_assistant(&self) -> &str {
        &self.pending_assistant
    }

    /// Finalizes the turn: at most one user message, then at most one
    /// assistant message. Both accumulators are empty afterwards.
    pub fn on_turn_complete(&mut self) -> Vec<Message> {
        let mut finalized = Vec::with_capacity(2);
        for role in [Role::User, Role::Assistant] {
            let pending = match role {
                Role::User => std::mem::take(&mut self.pending_user),
                Role::Assistant => std::mem::take(&mut self.pending_assistant),
            };
            let text = pending.trim();
            if text.is_empty() {
                continue;
            }
            finalized.push(Message {
                id: MessageId(self.next_id),
                role,
                text: text.to_string(),
                translation: None,
            });
            self.next_id += 1;
        }
        finalized
    }

    /// Drops partial text without emitting anything, ex: on session teardown.
    pub fn reset(&mut self) {
        self.pending_user.clear();
        self.pending_assistant.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deltas_join_into_one_message() {
        let mut assembler = TranscriptAssembler::new();
        assembler.on_user_delta("hi ");
        assembler.on_user_delta("there");

        let messages = assembler.on_turn_complete();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), Role::User);
        assert_eq!(messages[0].text(), "hi there");
        assert!(assembler.pending_user().is_empty());
        assert!(assembler.pending_assistant().is_empty());
    }

    #[test]
    fn user_message_precedes_assistant_message() {
        let mut assembler = TranscriptAssembler::new();
        assembler.on_assistant_delta("Hello!");
        assembler.on_user_delta(" how are you ");

        let messages = assembler.on_turn_complete();
        let roles: Vec<Role> = messages.iter().map(Message::role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(messages[0].text(), "how are you");
        assert!(messages[0].id() < messages[1].id());
    }

    #[test]
    fn empty_turn_emits_nothing() {
        let mut assembler = TranscriptAssembler::new();
        assert!(assembler.on_turn_complete().is_empty());
        assembler.on_user_delta("   ");
        assert!(assembler.on_turn_complete().is_empty());
        assert!(assembler.pending_user().is_empty());
    }

    #[test]
    fn ids_keep_increasing_across_turns() {
        let mut assembler = TranscriptAssembler::new();
        assembler.on_assistant_delta("one");
        let first = assembler.on_turn_complete();
        assembler.on_assistant_delta("two");
        let second = assembler.on_turn_complete();
        assert!(first[0].id() < second[0].id());
    }

    #[test]
    fn reset_discards_partials() {
        let mut assembler = TranscriptAssembler::new();
        assembler.on_user_delta("half a sen");
        assembler.reset();
        assert!(assembler.on_turn_complete().is_empty());
    }

    #[test]
    fn translation_can_be_attached_later() {
        let mut assembler = TranscriptAssembler::new();
        assembler.on_assistant_delta("Bonjour");
        let mut message = assembler.on_turn_complete().remove(0);
        message.attach_translation("Hello".to_string());
        assert_eq!(message.translation(), Some("Hello"));
    }
}
