use serde::{Deserialize, Serialize};

/// Placeholder replaced by the turn text when a formatting template is set.
pub const INPUT_PLACEHOLDER: &str = "{input}";

pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Image attached to a message: an `http(s)` URL or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

impl ImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Splits a base64 `data:` URL into `(media_type, data)`.
    pub fn as_base64(&self) -> Option<(&str, &str)> {
        let rest = self.url.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let media_type = header.strip_suffix(";base64")?;
        Some((media_type, data))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One user-authored input awaiting one or more model responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub text: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
    pub target_models: Vec<String>,
    #[serde(default)]
    pub template: Option<String>,
    /// Number of trailing history messages sent with the turn.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Turn {
    pub fn new(text: impl Into<String>, target_models: Vec<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            target_models,
            template: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
            history: Vec::new(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>, context_window: usize) -> Self {
        self.history = history;
        self.context_window = context_window;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Turn text after applying the formatting template.
    pub fn rendered_text(&self) -> String {
        match self.template.as_deref() {
            None => self.text.clone(),
            Some(template) if template.trim().is_empty() => self.text.clone(),
            Some(template) if template.contains(INPUT_PLACEHOLDER) => {
                template.replace(INPUT_PLACEHOLDER, &self.text)
            }
            Some(template) => format!("{}\n\n{}", template, self.text),
        }
    }

    pub fn to_canonical_request(&self, model: &str) -> CanonicalRequest {
        let kept = self.history.len().min(self.context_window);
        let mut messages = Vec::with_capacity(kept + 2);
        if let Some(system_prompt) = self.system_prompt.as_deref() {
            if !system_prompt.trim().is_empty() {
                messages.push(ChatMessage::system(system_prompt));
            }
        }

        let skip = self.history.len() - kept;
        messages.extend(self.history.iter().skip(skip).cloned());

        messages.push(ChatMessage {
            role: MessageRole::User,
            content: self.rendered_text(),
            image: self.image.clone(),
        });

        CanonicalRequest {
            model: model.to_string(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        }
    }
}

/// Provider-independent chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl CanonicalRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: true,
        }
    }

    /// Concatenated system messages, if any.
    pub fn system_text(&self) -> Option<String> {
        let parts = self
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}
