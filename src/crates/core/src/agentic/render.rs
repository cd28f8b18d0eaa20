//! Derived render metadata for finished responses

use chorus_core_types::SlotState;
use serde::Serialize;

const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    /// Hex md5 of the content, used by renderers to skip unchanged output.
    pub content_digest: String,
    pub char_count: usize,
    pub line_count: usize,
    /// Fenced code blocks; an unclosed trailing fence still counts.
    pub code_block_count: usize,
    pub has_reasoning: bool,
}

impl RenderMetadata {
    pub fn from_state(state: &SlotState) -> Self {
        let content = state.content.as_str();
        let fences = content
            .lines()
            .filter(|line| line.trim_start().starts_with(CODE_FENCE))
            .count();
        Self {
            content_digest: format!("{:x}", md5::compute(content.as_bytes())),
            char_count: content.chars().count(),
            line_count: content.lines().count(),
            code_block_count: (fences + 1) / 2,
            has_reasoning: !state.reasoning.trim().is_empty(),
        }
    }
}
