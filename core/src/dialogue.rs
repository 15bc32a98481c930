//! Dialogue lines exchanged with the avatar front end.
//!
//! The LLM is instructed to answer with a JSON array of lines, each carrying
//! the spoken text plus a facial expression and an animation label. Some
//! models wrap the array in an object under `messages`; both shapes are
//! accepted by [`parse_dialogue`].

use crate::errors::{AvatarError, AvatarResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facial expression label consumed by the 3D client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "&'static str")]
pub enum FacialExpression {
    Smile,
    Sad,
    Angry,
    Surprised,
    FunnyFace,
    #[default]
    Default,
}

impl FacialExpression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smile => "smile",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::FunnyFace => "funnyFace",
            Self::Default => "default",
        }
    }
}

impl From<Option<String>> for FacialExpression {
    fn from(label: Option<String>) -> Self {
        match label.as_deref().unwrap_or_default() {
            "smile" => Self::Smile,
            "sad" => Self::Sad,
            "angry" => Self::Angry,
            "surprised" => Self::Surprised,
            "funnyFace" => Self::FunnyFace,
            _ => Self::Default,
        }
    }
}

impl From<FacialExpression> for &'static str {
    fn from(expression: FacialExpression) -> Self {
        expression.as_str()
    }
}

/// Body animation label consumed by the 3D client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "&'static str")]
pub enum Animation {
    Talking0,
    Talking1,
    Talking2,
    Crying,
    Laughing,
    Rumba,
    #[default]
    Idle,
    Terrified,
    Angry,
}

impl Animation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Talking0 => "Talking_0",
            Self::Talking1 => "Talking_1",
            Self::Talking2 => "Talking_2",
            Self::Crying => "Crying",
            Self::Laughing => "Laughing",
            Self::Rumba => "Rumba",
            Self::Idle => "Idle",
            Self::Terrified => "Terrified",
            Self::Angry => "Angry",
        }
    }
}

impl From<Option<String>> for Animation {
    fn from(label: Option<String>) -> Self {
        match label.as_deref().unwrap_or_default() {
            "Talking_0" => Self::Talking0,
            "Talking_1" => Self::Talking1,
            "Talking_2" => Self::Talking2,
            "Crying" => Self::Crying,
            "Laughing" => Self::Laughing,
            "Rumba" => Self::Rumba,
            "Terrified" => Self::Terrified,
            "Angry" => Self::Angry,
            _ => Self::Idle,
        }
    }
}

impl From<Animation> for &'static str {
    fn from(animation: Animation) -> Self {
        animation.as_str()
    }
}

/// One scripted line of the avatar's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueLine {
    pub text: String,
    #[serde(default)]
    pub facial_expression: FacialExpression,
    #[serde(default)]
    pub animation: Animation,
}

impl DialogueLine {
    pub fn new(text: impl Into<String>, facial_expression: FacialExpression, animation: Animation) -> Self {
        Self {
            text: text.into(),
            facial_expression,
            animation,
        }
    }
}

/// Lip-sync timing cues as produced by the alignment tool, passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingCueSet(pub Value);

/// A dialogue line with its synthesized audio and lip-sync cues attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLine {
    #[serde(flatten)]
    pub line: DialogueLine,
    /// Base64-encoded audio bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lipsync: Option<TimingCueSet>,
}

/// Response body of a successful chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueReply {
    pub messages: Vec<EnrichedLine>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DialogueEnvelope {
    Bare(Vec<DialogueLine>),
    Wrapped { messages: Vec<DialogueLine> },
    Single(DialogueLine),
}

/// Parses the LLM's message content into an ordered list of lines.
///
/// Accepts a bare array, an object wrapping the array under `messages`, or a
/// single line object. A surrounding Markdown code fence is ignored.
pub fn parse_dialogue(content: &str) -> AvatarResult<Vec<DialogueLine>> {
    let json = strip_code_fence(content);

    let envelope: DialogueEnvelope = serde_json::from_str(json).map_err(|e| {
        AvatarError::ParsingError(format!(
            "LLM content is not a dialogue line list ({}): {}",
            e,
            truncate(json, 200)
        ))
    })?;

    Ok(match envelope {
        DialogueEnvelope::Bare(lines) => lines,
        DialogueEnvelope::Wrapped { messages } => messages,
        DialogueEnvelope::Single(line) => vec![line],
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        // Drop the info string (e.g. "json") on the opening fence line
        Some((_, body)) => body,
        // Single-line fence: an inline info string runs up to the JSON
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
