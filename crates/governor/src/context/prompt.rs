//! The structured prompt handed to the LLM gateway.

use crate::context::budget::Section;
use nexus_core::Message;
use serde::Serialize;

/// Why a section is missing from the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OmissionReason {
    /// The backing subsystem failed this turn.
    SubsystemFailed,
    /// Not enough capacity was left for it.
    Budget,
}

/// What the assembler kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyStats {
    pub memory_items_included: usize,
    pub memory_items_dropped: usize,
    pub history_messages: usize,
    pub history_included: bool,
    pub omitted: Vec<(Section, OmissionReason)>,
}

/// One rendered prompt slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSection {
    pub name: Section,
    pub content: String,
    /// Content tokens plus framing overhead.
    pub token_count: usize,
}

impl PromptSection {
    pub fn header(&self) -> &'static str {
        header(self.name)
    }

    fn render(&self) -> String {
        if self.content.is_empty() {
            format!("{}\n", self.header())
        } else {
            format!("{}\n{}", self.header(), self.content)
        }
    }
}

/// Heading printed above a section.
pub fn header(section: Section) -> &'static str {
    match section {
        Section::System => "## SYSTEM",
        Section::Identity => "## IDENTITY SNAPSHOT",
        Section::Mood => "## MOOD STATE",
        Section::Memory => "## RELEVANT MEMORY",
        Section::History => "## CONVERSATION HISTORY",
        Section::Request => "## CURRENT REQUEST",
    }
}

/// Ordered prompt sections plus the history window that travels alongside.
///
/// Built only by the assembler, immutable afterwards. Slots always appear in
/// `system, identity, mood, memory, request` order; mood and memory may be
/// absent, the other three never are.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredPrompt {
    sections: Vec<PromptSection>,
    #[serde(skip)]
    history: Vec<Message>,
    history_tokens: usize,
    stats: AssemblyStats,
}

impl StructuredPrompt {
    pub(crate) fn new(
        mut sections: Vec<PromptSection>,
        history: Vec<Message>,
        history_tokens: usize,
        stats: AssemblyStats,
    ) -> Self {
        sections.sort_by_key(|s| slot_index(s.name));
        Self {
            sections,
            history,
            history_tokens,
            stats,
        }
    }

    pub fn stats(&self) -> &AssemblyStats {
        &self.stats
    }

    pub fn sections(&self) -> &[PromptSection] {
        &self.sections
    }

    pub fn section(&self, name: Section) -> Option<&PromptSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn has(&self, name: Section) -> bool {
        self.section(name).is_some()
    }

    /// Slot names in prompt order.
    pub fn names(&self) -> Vec<Section> {
        self.sections.iter().map(|s| s.name).collect()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_tokens(&self) -> usize {
        self.history_tokens
    }

    /// Tokens across every slot and the history window.
    pub fn total_tokens(&self) -> usize {
        self.sections.iter().map(|s| s.token_count).sum::<usize>() + self.history_tokens
    }

    /// The context block: every slot before the request.
    pub fn render_context(&self) -> String {
        self.sections
            .iter()
            .filter(|s| s.name != Section::Request)
            .map(PromptSection::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The full prompt as one text, history excluded.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(PromptSection::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Chat messages for a provider: the context block as the system
    /// message, then the history window, then the request.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.render_context()));
        messages.extend(self.history.iter().cloned());
        if let Some(request) = self.section(Section::Request) {
            messages.push(Message::user(request.render()));
        }
        messages
    }
}

fn slot_index(section: Section) -> usize {
    Section::PROMPT_ORDER
        .iter()
        .position(|s| *s == section)
        .unwrap_or(Section::PROMPT_ORDER.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::Role;

    fn section(name: Section, content: &str) -> PromptSection {
        PromptSection {
            name,
            content: content.into(),
            token_count: 4,
        }
    }

    #[test]
    fn sections_are_put_in_slot_order() {
        let prompt = StructuredPrompt::new(
            vec![
                section(Section::Request, "hi"),
                section(Section::Memory, "- m\n"),
                section(Section::System, "rules"),
                section(Section::Identity, "Name: X"),
            ],
            vec![],
            0,
            AssemblyStats::default(),
        );
        assert_eq!(
            prompt.names(),
            vec![Section::System, Section::Identity, Section::Memory, Section::Request]
        );
        assert!(!prompt.has(Section::Mood));
    }

    #[test]
    fn messages_frame_history_between_context_and_request() {
        let prompt = StructuredPrompt::new(
            vec![
                section(Section::System, "rules"),
                section(Section::Identity, "Name: X"),
                section(Section::Request, "What now?"),
            ],
            vec![Message::user("earlier"), Message::assistant("reply")],
            10,
            AssemblyStats::default(),
        );
        let msgs = prompt.to_messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.starts_with("## SYSTEM\nrules\n\n## IDENTITY SNAPSHOT\nName: X"));
        assert_eq!(msgs[1].content, "earlier");
        assert_eq!(msgs[3].content, "## CURRENT REQUEST\nWhat now?");
        assert_eq!(prompt.total_tokens(), 22);
    }

    #[test]
    fn empty_memory_renders_header_only() {
        let prompt = StructuredPrompt::new(
            vec![section(Section::Memory, "")],
            vec![],
            0,
            AssemblyStats::default(),
        );
        assert_eq!(prompt.render(), "## RELEVANT MEMORY\n");
    }
}
