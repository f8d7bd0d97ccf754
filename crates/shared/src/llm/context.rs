use crate::models::{Message, MessageRole};

use super::client::ContextMessage;

/// Builds the ordered context for a turn: optional system prompt, bounded
/// history oldest first, then the new user message.
#[derive(Debug, Clone)]
pub struct ConversationAssembler {
    system_prompt: Option<String>,
    max_history_messages: usize,
}

impl ConversationAssembler {
    pub fn new(system_prompt: Option<String>, max_history_messages: usize) -> Self {
        Self {
            system_prompt: system_prompt.filter(|prompt| !prompt.trim().is_empty()),
            max_history_messages,
        }
    }

    pub fn max_history_messages(&self) -> usize {
        self.max_history_messages
    }

    pub fn assemble(&self, history: &[Message], new_user_text: &str) -> Vec<ContextMessage> {
        let skip = history.len().saturating_sub(self.max_history_messages);
        let recent = &history[skip..];

        let mut context = Vec::with_capacity(recent.len() + 2);
        if let Some(prompt) = self.system_prompt.as_deref() {
            context.push(ContextMessage::new(
                MessageRole::System.provider_name(),
                prompt,
            ));
        }
        context.extend(recent.iter().map(|message| {
            ContextMessage::new(message.role.provider_name(), message.content.as_str())
        }));
        context.push(ContextMessage::new(
            MessageRole::User.provider_name(),
            new_user_text,
        ));
        context
    }
}
