//! Decoded file content and semantic-type naming.
//!
//! Content is what the cache holds per path: the decoded form of the
//! persisted bytes. The decode rule is driven purely by the file name:
//! `.json` files parse into structured values, image extensions load as
//! raw bytes, everything else is text.
//!
//! A file's semantic type is the bracketed tag embedded in its name
//! (`Hero.[character].json` is a character file). The tag is a naming
//! convention, never a stored attribute: it is recomputed from the name
//! on every access.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VaultError, VaultResult};

/// Extensions decoded as raw binary (case-insensitive).
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

/// Matches the bracketed semantic tag between two dots: `name.[tag].ext`.
static SEMANTIC_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\[(.*?)\]\.").expect("semantic tag pattern is valid"));

/// Decoded content of a file, as held by the content cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Content {
    /// UTF-8 text.
    Text(String),
    /// Parsed JSON document.
    Json(Value),
    /// Raw bytes (images).
    Binary(Vec<u8>),
}

impl Content {
    /// Decode persisted bytes according to the file name.
    ///
    /// `.json` names parse as JSON (malformed input is a parse error),
    /// image extensions stay binary, everything else decodes as text
    /// (lossy for invalid UTF-8). The `.json` match is exact case;
    /// only the image set matches case-insensitively.
    pub fn decode(name: &str, bytes: Vec<u8>) -> VaultResult<Self> {
        if name.ends_with(".json") {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| VaultError::parse(format!("{}: {}", name, e)))?;
            Ok(Self::Json(value))
        } else if is_image_name(name) {
            Ok(Self::Binary(bytes))
        } else {
            Ok(Self::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    /// Encode back to persisted bytes.
    ///
    /// JSON values are pretty-printed, matching how authored package
    /// files are kept human-readable on disk.
    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        match self {
            Self::Text(s) => Ok(s.clone().into_bytes()),
            Self::Json(v) => serde_json::to_vec_pretty(v)
                .map_err(|e| VaultError::parse(e.to_string())),
            Self::Binary(b) => Ok(b.clone()),
        }
    }

    /// Get the structured value, if this is JSON content.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Get the text, if this is text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for structured JSON content.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Returns true if the name carries an image extension.
pub fn is_image_name(name: &str) -> bool {
    match name.rfind('.') {
        Some(i) => {
            let ext = &name[i + 1..];
            IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
        }
        None => false,
    }
}

/// Extract the raw semantic tag from a file name.
///
/// `Hero.[character].json` yields `character`. Names without a bracketed
/// tag yield None.
pub fn semantic_tag(name: &str) -> Option<String> {
    SEMANTIC_TAG
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Known semantic file kinds.
///
/// The wire form is the camelCase tag as it appears inside the brackets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum SemanticKind {
    Character,
    Preset,
    Background,
    Component,
    Setting,
    ModelConfig,
}

/// Resolve the semantic kind of a file name, if its tag is a known kind.
pub fn semantic_kind(name: &str) -> Option<SemanticKind> {
    semantic_tag(name).and_then(|tag| SemanticKind::from_str(&tag).ok())
}
