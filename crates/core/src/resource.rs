//! Resource states, kinds and naming rules.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a Sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceState {
    /// Accepting topics and chunks.
    Uploading,
    /// Finalized; immutable forever.
    Archived,
    /// Aborted; its data is being purged.
    Aborted,
}

impl SequenceState {
    /// Whether topics and chunks may still be written.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    /// Whether the state admits no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Archived => "archived",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "archived" => Ok(Self::Archived),
            "aborted" => Ok(Self::Aborted),
            other => Err(Error::Serialization(format!("unknown sequence state: {other}"))),
        }
    }
}

/// Kind of resource a token or notification is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Sequence,
    Topic,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequence" => Ok(Self::Sequence),
            "topic" => Ok(Self::Topic),
            other => Err(Error::Serialization(format!("unknown resource kind: {other}"))),
        }
    }
}

/// Severity of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(Error::Serialization(format!("unknown severity: {other}"))),
        }
    }
}

/// Physical layout family of a topic's records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Fixed-width tabular rows.
    #[default]
    Default,
    /// Rows carrying variable-length lists.
    Ragged,
    /// Rows carrying encoded image payloads.
    Image,
}

impl SerializationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Ragged => "ragged",
            Self::Image => "image",
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "ragged" => Ok(Self::Ragged),
            "image" => Ok(Self::Image),
            other => Err(Error::Serialization(format!(
                "unknown serialization format: {other}"
            ))),
        }
    }
}

/// Maximum length of a sequence name or topic path.
pub const MAX_NAME_LEN: usize = 256;

/// Normalize a sequence name.
///
/// Leading/trailing whitespace and leading slashes are stripped. Names use
/// `[A-Za-z0-9_.-]` only, which keeps a `/` unambiguous inside a locator.
pub fn sanitize_sequence_name(raw: &str) -> Result<String> {
    let name = raw.trim().trim_start_matches('/').trim_end_matches('/');
    if name.is_empty() {
        return Err(Error::InvalidName("sequence name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "sequence name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name == "." || name.contains("..") {
        return Err(Error::InvalidName(format!("'{name}' is not a valid name")));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(Error::InvalidName(format!(
            "character '{bad}' not allowed in sequence name '{name}'"
        )));
    }
    Ok(name.to_string())
}

/// Normalize a topic path relative to its sequence.
///
/// Accepts both `"imu/front"` and the fully qualified `"s1/imu/front"`.
pub fn normalize_topic_path(sequence_name: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    let relative = trimmed
        .strip_prefix(sequence_name)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(trimmed);
    validate_topic_path(relative)?;
    Ok(relative.to_string())
}

/// Check a relative topic path without rewriting it.
pub fn validate_topic_path(relative: &str) -> Result<()> {
    if relative.is_empty() {
        return Err(Error::InvalidName("topic path is empty".to_string()));
    }
    if relative.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "topic path exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidName(format!(
                "topic path '{relative}' has an empty or relative segment"
            )));
        }
        if let Some(bad) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::InvalidName(format!(
                "character '{bad}' not allowed in topic path '{relative}'"
            )));
        }
    }
    Ok(())
}

/// Address of a Sequence or one Topic within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    pub sequence: String,
    pub topic: Option<String>,
}

impl Locator {
    /// Parse `"sequence"` or `"sequence/topic/path"`.
    ///
    /// Everything after the first `/` is the stored topic path, taken as is.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_matches('/');
        let (sequence, topic) = match trimmed.split_once('/') {
            Some((sequence, topic)) => (sequence, Some(topic)),
            None => (trimmed, None),
        };
        let sequence = sanitize_sequence_name(sequence)
            .map_err(|e| Error::InvalidLocator(format!("{raw}: {e}")))?;
        if let Some(topic) = topic {
            validate_topic_path(topic)
                .map_err(|e| Error::InvalidLocator(format!("{raw}: {e}")))?;
        }
        let topic = topic.map(str::to_string);
        Ok(Self { sequence, topic })
    }

    /// Locator of a topic inside a sequence.
    pub fn topic(sequence: &str, path: &str) -> Self {
        Self {
            sequence: sequence.to_string(),
            topic: Some(path.to_string()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{}/{}", self.sequence, topic),
            None => f.write_str(&self.sequence),
        }
    }
}
