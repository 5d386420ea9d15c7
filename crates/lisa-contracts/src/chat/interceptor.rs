use crate::catalog::ResolveImage;

use super::conversation::Message;

/// At least one of these must appear in an utterance before any resolver
/// work happens; ordinary chat is rejected cheaply.
pub const INTENT_PHRASES: &[&str] = &[
    "show me",
    "display",
    "picture of",
    "image of",
    "can i see",
];

const FOLDER_WORD: &str = "folder";

/// Inspects a raw user utterance and, when it is satisfiable locally,
/// produces a complete assistant turn without contacting the remote
/// assistant.
///
/// Matching is lowercase substring matching, not tokenized. That makes
/// "caboose" match inside an unrelated longer word; the imprecision is a
/// compatibility requirement and is pinned by tests below.
///
/// Two rules run in a fixed order:
/// 1. generic scan: first keyword (in table order) found as a substring is
///    handed to the resolver;
/// 2. folder fallback: only when the generic scan produced no usable
///    attachment, a category name mentioned together with the word
///    "folder" answers with that category's first resource.
pub struct Interceptor {
    keywords: Vec<String>,
    resolver: Box<dyn ResolveImage>,
}

impl Interceptor {
    /// `keywords` must already be in scan order; the list order is the
    /// tie-break when several keywords appear in one utterance.
    pub fn new(keywords: Vec<String>, resolver: Box<dyn ResolveImage>) -> Self {
        Self { keywords, resolver }
    }

    pub fn intercept(&self, utterance: &str) -> Option<Message> {
        let lowered = utterance.to_lowercase();
        if !INTENT_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            return None;
        }

        if let Some(message) = self.generic_scan(&lowered) {
            return Some(message);
        }
        self.folder_fallback(&lowered)
    }

    fn generic_scan(&self, lowered: &str) -> Option<Message> {
        let winner = self
            .keywords
            .iter()
            .find(|keyword| lowered.contains(keyword.as_str()))?;
        let attachment = self.resolver.resolve(winner)?;
        Some(Message::assistant_with_attachment(
            format!("Here's the {}.", attachment.display_name),
            attachment,
        ))
    }

    fn folder_fallback(&self, lowered: &str) -> Option<Message> {
        if !lowered.contains(FOLDER_WORD) {
            return None;
        }
        for keyword in &self.keywords {
            if !lowered.contains(keyword.as_str()) {
                continue;
            }
            if let Some(attachment) = self.resolver.resolve(keyword) {
                return Some(Message::assistant_with_attachment(
                    format!("Here's the first image from the {keyword} folder."),
                    attachment,
                ));
            }
        }
        None
    }
}
