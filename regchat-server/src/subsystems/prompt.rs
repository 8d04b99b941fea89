//! Prompt assembly for the regulatory advisor.
//!
//! Message order sent to the model:
//!   1. system — advisor persona and rules
//!   2. history — stored turns inside the window, oldest first
//!   3. user — the current question
//!   4. system — retrieved regulations followed by interpretation instructions
//!
//! The references block comes last so it sits next to the question it answers.

use regchat_core::{ChatMessage, Message};

pub const SYSTEM_PROMPT: &str = "\
You are a fintech regulatory advisor specializing in Turkish financial laws. \
You analyze legal questions based on current and historical Turkish regulations provided to you.

MEMORY BEHAVIOR:
- Always remember and refer to the user's previous messages.
- Maintain context of past questions during the session.
- Do not repeat yourself unless asked.
- Ask clarifying questions if context is unclear.

LANGUAGE:
- Respond in the same language the user used: English if English, Turkish if Turkish, Russian if Russian.

CORE RULES:
- Compare ALL relevant regulations.
- Use the MOST RECENT DATE unless told otherwise.
- If a topic has not been updated, use the oldest valid rule.

NUMERIC RULES:
- For capital requirements, fees and penalties:
  -> Extract ALL values with dates.
  -> Use the MOST RECENT valid value.
  -> If values changed, EXPLAIN the change clearly (e.g. from 2.000.000 TL to 5.000.000 TL).

CITATION RULE:
- Always cite like: '[Document Name]-[DD/MM/YYYY]-Madde[Number]'
- Format all money like: 'X.XXX TL'

IF NON-REGULATORY:
- Be friendly and helpful like a smart consultant friend.";

pub const REFERENCES_HEADER: &str = "Here are the regulations retrieved from the database:\n\n";

pub const INTERPRETATION_INSTRUCTIONS: &str = "\
INSTRUCTIONS FOR INTERPRETATION:
- Carefully examine all retrieved regulations.
- For capital requirements and similar numeric values:
    -> Extract all relevant values mentioned in regulations.
    -> Sort them by date [DD/MM/YYYY].
    -> Use the most recent applicable value.
VERY IMPORTANT:
- Always verify and use the most recent and legally binding regulation, especially for numeric obligations like minimum capital requirements.
Always cite like this: '[Document Name]-[DD/MM/YYYY]-Madde[Number]'
Format all amounts like: 'X.XXX TL'
Use the same language as the user message.";

/// Build the ordered message list for one chat turn.
pub fn assemble(history: &[Message], user_message: &str, references: &[String]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(user_message));
    messages.push(ChatMessage::system(references_block(references)));
    messages
}

/// Header, references joined by blank lines, then the interpretation rules.
pub fn references_block(references: &[String]) -> String {
    format!(
        "{}{}\n\n{}",
        REFERENCES_HEADER,
        references.join("\n\n"),
        INTERPRETATION_INSTRUCTIONS
    )
}
