//! Append-only transcript of the chat.
//!
//! The transcript is the only owner of rendered messages. Renderers never
//! reach into it; callers hand it finished bodies through `append`.

use crate::gemini::Part;
use crate::render::{render_parts, Block, ImageState, RenderedBody};

pub type MessageId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Ai,
    System,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Ai => "AI",
            Role::System => "System",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Body {
    Plain(String),
    Rendered(RenderedBody),
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub body: Body,
}

impl Message {
    pub fn rendered(&self) -> Option<&RenderedBody> {
        match &self.body {
            Body::Rendered(body) => Some(body),
            Body::Plain(_) => None,
        }
    }

    pub fn plain_text(&self) -> Option<&str> {
        match &self.body {
            Body::Plain(text) => Some(text),
            Body::Rendered(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Top line of the viewport. `u16::MAX` means "as far down as possible";
    /// the view clamps it once it knows the content height.
    scroll: u16,
    selected: Option<MessageId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, body: Body) -> MessageId {
        let id = self.messages.len();
        self.messages.push(Message { id, role, body });
        self.scroll_to_bottom();
        id
    }

    /// User and system messages, plus the legacy plain-string path for ai
    /// text, which still goes through the markdown renderer.
    pub fn append_text(&mut self, role: Role, text: impl Into<String>) -> MessageId {
        let text = text.into();
        match role {
            Role::Ai => self.append(role, Body::Rendered(render_parts(&[Part::Text { text }]))),
            _ => self.append(role, Body::Plain(text)),
        }
    }

    /// Appends an ai message, unless no part produced anything renderable.
    pub fn append_parts(&mut self, parts: &[Part]) -> Option<MessageId> {
        let body = render_parts(parts);
        if body.blocks.is_empty() {
            return None;
        }
        Some(self.append(Role::Ai, Body::Rendered(body)))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Records the outcome of decoding an image block. Returns whether the
    /// block existed.
    pub fn set_image_state(&mut self, id: MessageId, block: usize, state: ImageState) -> bool {
        let Some(Message {
            body: Body::Rendered(body),
            ..
        }) = self.messages.get_mut(id)
        else {
            return false;
        };
        match body.blocks.get_mut(block) {
            Some(Block::Image(image)) => {
                image.state = state;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn scroll(&self) -> u16 {
        self.scroll
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = u16::MAX;
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines);
    }

    /// Called by the view with the largest valid offset.
    pub fn clamp_scroll(&mut self, max: u16) -> u16 {
        self.scroll = self.scroll.min(max);
        self.scroll
    }

    pub fn selected(&self) -> Option<&Message> {
        self.selected.and_then(|id| self.messages.get(id))
    }

    pub fn selected_id(&self) -> Option<MessageId> {
        self.selected
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn select_prev(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(id) => id.saturating_sub(1),
            None => self.messages.len() - 1,
        });
    }

    pub fn select_next(&mut self) {
        self.selected = match self.selected {
            Some(id) if id + 1 < self.messages.len() => Some(id + 1),
            Some(_) => None,
            None => None,
        };
    }

    /// The selected message, or the latest ai message when nothing is selected.
    pub fn target(&self) -> Option<&Message> {
        self.selected().or_else(|| {
            self.messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Ai)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_call_order() {
        let mut transcript = Transcript::new();
        let a = transcript.append_text(Role::User, "Hello");
        let b = transcript.append_text(Role::System, "Error: nope");
        assert_eq!((a, b), (0, 1));
        let roles: Vec<Role> = transcript.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::System]);
    }

    #[test]
    fn every_append_pins_scroll_to_the_end() {
        let mut transcript = Transcript::new();
        transcript.append_text(Role::User, "one");
        transcript.clamp_scroll(10);
        transcript.scroll_up(4);
        assert_eq!(transcript.scroll(), 6);

        transcript.append_text(Role::System, "two");
        assert_eq!(transcript.clamp_scroll(12), 12);
    }

    #[test]
    fn empty_part_lists_append_nothing() {
        let mut transcript = Transcript::new();
        assert!(transcript.append_parts(&[]).is_none());
        assert!(transcript.is_empty());
    }

    #[test]
    fn legacy_ai_strings_are_rendered() {
        let mut transcript = Transcript::new();
        let id = transcript.append_text(Role::Ai, "```\nx\n```");
        let body = transcript.get(id).unwrap().rendered().unwrap();
        assert_eq!(body.run_code_affordances().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn image_state_updates_only_hit_image_blocks() {
        let mut transcript = Transcript::new();
        let id = transcript
            .append_parts(&[Part::text("caption"), Part::inline_data("image/png", "AAAA")])
            .unwrap();

        assert!(!transcript.set_image_state(id, 0, ImageState::Broken("x".into())));
        assert!(transcript.set_image_state(
            id,
            1,
            ImageState::Loaded {
                width: 2,
                height: 3,
                bytes: 4
            }
        ));
        assert!(!transcript.set_image_state(id + 1, 1, ImageState::Pending));
    }

    #[test]
    fn selection_walks_backwards_from_the_latest() {
        let mut transcript = Transcript::new();
        transcript.append_text(Role::User, "q");
        transcript.append_text(Role::Ai, "a");

        transcript.select_prev();
        assert_eq!(transcript.selected_id(), Some(1));
        transcript.select_prev();
        transcript.select_prev();
        assert_eq!(transcript.selected_id(), Some(0));
        transcript.select_next();
        transcript.select_next();
        assert_eq!(transcript.selected_id(), None);
    }

    #[test]
    fn target_defaults_to_latest_ai_message() {
        let mut transcript = Transcript::new();
        transcript.append_text(Role::Ai, "first");
        transcript.append_text(Role::User, "q");
        assert_eq!(transcript.target().map(|m| m.id), Some(0));
    }
}
