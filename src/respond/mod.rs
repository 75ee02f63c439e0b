//! Prompt assembly and reply generation with a fixed fallback.

use crate::config::AssistantConfig;
use crate::generation::{Generator, PromptMessage};
use crate::models::{ConversationMessage, Role};
use crate::retrieval::ContextBundle;
use std::sync::Arc;

const CONTEXT_HEADER: &str = "## Knowledge base context";

const NO_CONTEXT_NOTICE: &str =
    "No documentation is loaded for this question. Suggest contacting support for further help.";

pub struct Responder {
    generator: Arc<dyn Generator>,
    config: AssistantConfig,
}

impl Responder {
    /// `generator` should already be rate limited and time bounded
    pub fn new(generator: Arc<dyn Generator>, config: AssistantConfig) -> Self {
        Self { generator, config }
    }

    pub fn fallback_reply(&self) -> &str {
        &self.config.fallback_reply
    }

    /// Produce the assistant reply. Never fails: any generation problem
    /// yields the configured fallback reply.
    pub async fn respond(
        &self,
        user_message: &str,
        history: &[ConversationMessage],
        context: &ContextBundle,
    ) -> String {
        let prompt = self.build_prompt(user_message, history, context);
        match self.generator.generate(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                log::warn!("Generation returned an empty reply, using fallback");
                self.config.fallback_reply.clone()
            }
            Err(e) => {
                log::warn!("Generation failed, using fallback: {}", e);
                self.config.fallback_reply.clone()
            }
        }
    }

    /// System message with context, then the most recent history, then the question
    pub fn build_prompt(
        &self,
        user_message: &str,
        history: &[ConversationMessage],
        context: &ContextBundle,
    ) -> Vec<PromptMessage> {
        let window = self.config.history_window;
        let recent = &history[history.len().saturating_sub(window)..];

        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(PromptMessage::system(self.system_prompt(context)));
        for message in recent {
            messages.push(match message.role {
                Role::User => PromptMessage::user(message.content.clone()),
                Role::Assistant => PromptMessage::assistant(message.content.clone()),
            });
        }
        messages.push(PromptMessage::user(user_message));
        messages
    }

    fn system_prompt(&self, context: &ContextBundle) -> String {
        let mut prompt = format!("{}\n\n{}\n\n", self.config.system_preamble, CONTEXT_HEADER);
        if context.is_empty() {
            prompt.push_str(NO_CONTEXT_NOTICE);
            return prompt;
        }

        let blocks: Vec<String> = context
            .passages
            .iter()
            .map(|p| match &p.section {
                Some(section) => format!("Source: {} [{}]\n{}", p.filename, section, p.text),
                None => format!("Source: {}\n{}", p.filename, p.text),
            })
            .collect();
        prompt.push_str(&blocks.join("\n\n"));
        prompt
    }
}
