//! Prompt and image extraction from chat-style message histories
//!
//! The chat surface carries the generation prompt in the last user
//! message, with input images embedded as markdown image links, data URIs,
//! or structured `image_url` content parts.

use serde::Deserialize;

use crate::provider::types::ImageRef;

/// One inbound chat message
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Chat content is either a plain string or a list of typed parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrlPart {
    pub url: String,
}

/// Prompt text and input images pulled from a message history
#[derive(Debug, Default)]
pub struct ExtractedPrompt {
    pub prompt: String,
    pub images: Vec<ImageRef>,
}

/// Extract the prompt and image references from the last user message
pub fn extract_from_messages(messages: &[ChatMessage]) -> ExtractedPrompt {
    let Some(message) = messages.iter().rev().find(|m| m.role == "user") else {
        return ExtractedPrompt::default();
    };

    match &message.content {
        MessageContent::Text(text) => {
            let (prompt, refs) = strip_markdown_images(text);
            ExtractedPrompt {
                prompt,
                images: refs.iter().map(|r| ImageRef::parse(r)).collect(),
            }
        }
        MessageContent::Parts(parts) => {
            let mut texts = Vec::new();
            let mut images = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        let (clean, refs) = strip_markdown_images(text);
                        if !clean.is_empty() {
                            texts.push(clean);
                        }
                        images.extend(refs.iter().map(|r| ImageRef::parse(r)));
                    }
                    ContentPart::ImageUrl { image_url } => {
                        images.push(ImageRef::parse(&image_url.url));
                    }
                }
            }
            ExtractedPrompt {
                prompt: texts.join("\n"),
                images,
            }
        }
    }
}

/// Remove `![alt](target)` links from the text, returning the cleaned
/// prompt and the collected targets
fn strip_markdown_images(text: &str) -> (String, Vec<String>) {
    let mut prompt = String::with_capacity(text.len());
    let mut images = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("![") {
        let after_bang = &rest[start..];
        let Some(mid) = after_bang.find("](") else {
            break;
        };
        let Some(end) = after_bang[mid + 2..].find(')') else {
            break;
        };

        prompt.push_str(&rest[..start]);
        let target = &after_bang[mid + 2..mid + 2 + end];
        if !target.is_empty() {
            images.push(target.to_string());
        }
        rest = &after_bang[mid + 2 + end + 1..];
    }
    prompt.push_str(rest);

    (prompt.trim().to_string(), images)
}
