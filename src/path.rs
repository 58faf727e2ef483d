//! Normalized absolute repository paths.
//!
//! Filters compare paths textually, so every path that reaches the
//! observation layer must already be in canonical form: absolute, without
//! `.`/`..` segments, and with default same-name-sibling indexes (`[1]`)
//! removed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

const ROOT: &str = "/";

/// A canonical absolute path.
///
/// Construct one through a [`PathNormalizer`] or [`NormalizedPath::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedPath(Arc<str>);

impl NormalizedPath {
    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self(Arc::from(ROOT))
    }

    /// Normalizes `raw` with the [`StandardPathNormalizer`].
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        StandardPathNormalizer.normalize(raw)
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT
    }

    /// Number of segments below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// The last segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(Arc::from(&self.0[..idx]))),
            None => None,
        }
    }

    /// Returns true if `self` equals `other` or lies below it.
    #[must_use]
    pub fn is_descendant_or_self_of(&self, other: &Self) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0.len() > other.0.len()
            && self.0.starts_with(&*other.0)
            && self.0.as_bytes()[other.0.len()] == b'/'
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NormalizedPath {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NormalizedPath> for String {
    fn from(path: NormalizedPath) -> Self {
        path.0.to_string()
    }
}

/// Turns caller-supplied path strings into canonical paths.
pub trait PathNormalizer: Send + Sync {
    /// Normalizes `raw`, failing with [`ConfigurationError::InvalidPath`]
    /// on malformed input.
    fn normalize(&self, raw: &str) -> Result<NormalizedPath, ConfigurationError>;
}

/// Default normalizer for slash-separated absolute paths.
///
/// Accepts `prefix:name` segments and same-name-sibling indexes such as
/// `item[2]`. Rejects relative paths, empty segments, `..` above the root,
/// and the characters `*`, `|`, `[`, `]` outside of an index suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardPathNormalizer;

impl PathNormalizer for StandardPathNormalizer {
    fn normalize(&self, raw: &str) -> Result<NormalizedPath, ConfigurationError> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(ConfigurationError::invalid_path(raw, "path must be absolute"));
        };

        if rest.starts_with('/') {
            return Err(ConfigurationError::invalid_path(raw, "empty path segment"));
        }
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let mut segments: Vec<String> = Vec::new();
        if !rest.is_empty() {
            for segment in rest.split('/') {
                match segment {
                    "" => return Err(ConfigurationError::invalid_path(raw, "empty path segment")),
                    "." => {}
                    ".." => {
                        if segments.pop().is_none() {
                            return Err(ConfigurationError::invalid_path(raw, "'..' above the root"));
                        }
                    }
                    other => segments.push(canonical_segment(raw, other)?),
                }
            }
        }

        if segments.is_empty() {
            return Ok(NormalizedPath::root());
        }
        let mut out = String::with_capacity(raw.len());
        for segment in &segments {
            out.push('/');
            out.push_str(segment);
        }
        Ok(NormalizedPath(Arc::from(out)))
    }
}

fn canonical_segment(raw: &str, segment: &str) -> Result<String, ConfigurationError> {
    let (name, index) = match segment.find('[') {
        Some(open) => {
            let Some(digits) = segment[open + 1..].strip_suffix(']') else {
                return Err(ConfigurationError::invalid_path(raw, format!("malformed index in '{segment}'")));
            };
            let index: u32 = digits
                .parse()
                .ok()
                .filter(|i| *i >= 1)
                .ok_or_else(|| ConfigurationError::invalid_path(raw, format!("invalid index in '{segment}'")))?;
            (&segment[..open], index)
        }
        None => (segment, 1),
    };

    validate_name(raw, name)?;

    if index == 1 {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}[{index}]"))
    }
}

fn validate_name(raw: &str, name: &str) -> Result<(), ConfigurationError> {
    let local = match name.split_once(':') {
        Some((prefix, local)) => {
            if prefix.is_empty() || prefix.contains(char::is_whitespace) {
                return Err(ConfigurationError::invalid_path(raw, format!("invalid prefix in '{name}'")));
            }
            local
        }
        None => name,
    };

    if local.is_empty() || local.trim() != local {
        return Err(ConfigurationError::invalid_path(raw, format!("invalid name '{name}'")));
    }
    if let Some(c) = local.chars().find(|c| matches!(c, '*' | '|' | '[' | ']' | ':')) {
        return Err(ConfigurationError::invalid_path(raw, format!("illegal character '{c}' in '{name}'")));
    }
    Ok(())
}
