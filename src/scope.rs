//! Scope names such as `string.quoted.double.js`.
//!
//! A [`Scope`] is one dotted name. A [`ScopeName`] is what a rule's `name` or `contentName`
//! holds: one or more scopes separated by spaces, all pushed at once. Parts of a scope can be
//! capture placeholders (`$1`, `${2}`) that are filled in from a regex match with
//! [`ScopeName::resolve`] before ending up in a token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ScopelineResult};

/// What a placeholder resolves to when its capture group did not participate in the match.
pub const MISSING_CAPTURE: &str = "unmatched";

/// A single dot-separated component of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopePart {
    Name(String),
    /// `$N` or `${N}`: replaced by the text of capture group N
    Capture(usize),
}

impl ScopePart {
    fn parse(part: &str) -> Result<Self, String> {
        if part.is_empty() {
            return Err("empty part".to_owned());
        }

        if let Some(rest) = part.strip_prefix('$') {
            let digits = rest
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .unwrap_or(rest);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("'{part}' is not a capture placeholder"));
            }
            return digits
                .parse()
                .map(ScopePart::Capture)
                .map_err(|_| format!("capture index in '{part}' is too large"));
        }

        if let Some(c) = part.chars().find(|c| !is_part_char(*c)) {
            return Err(format!("unexpected character '{c}' in '{part}'"));
        }

        Ok(ScopePart::Name(part.to_owned()))
    }
}

impl fmt::Display for ScopePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopePart::Name(name) => f.write_str(name),
            ScopePart::Capture(index) => write!(f, "${index}"),
        }
    }
}

/// A hierarchical position in source code like "source.rust.meta.function"
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Scope {
    parts: Vec<ScopePart>,
}

impl Scope {
    /// Parses a single dotted scope name. Whitespace is not allowed inside it,
    /// use [`ScopeName::parse`] for space-separated stacks.
    pub fn new(s: &str) -> ScopelineResult<Scope> {
        let invalid = |reason: String| Error::InvalidScopeName {
            value: s.to_owned(),
            reason,
        };

        if s.is_empty() {
            return Err(invalid("scope name is empty".to_owned()));
        }

        let parts = s
            .split('.')
            .map(ScopePart::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        Ok(Scope { parts })
    }

    pub fn parts(&self) -> &[ScopePart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The last part, which is the language for grammar scopes: `rust` for `source.rust`
    pub fn language(&self) -> Option<&str> {
        match self.parts.last() {
            Some(ScopePart::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// The first part, which is the kind of scope: `source` for `source.rust`
    pub fn scope_type(&self) -> Option<&str> {
        match self.parts.first() {
            Some(ScopePart::Name(name)) => Some(name),
            _ => None,
        }
    }

    pub fn has_captures(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ScopePart::Capture(_)))
    }

    /// `source.rust` is a prefix of `source.rust.meta` but not of `source.rusty`
    pub fn is_prefix_of(&self, other: &Scope) -> bool {
        other.parts.starts_with(&self.parts)
    }

    /// Replaces capture placeholders with the text they captured in `text`.
    /// `captures` holds the byte range of each group, group 0 being the whole match.
    ///
    /// The result always parses back with [`Scope::new`]: dots in the captured text start new
    /// parts and any character a part can't hold becomes `_`.
    pub fn resolve(&self, text: &str, captures: &[Option<(usize, usize)>]) -> Scope {
        if !self.has_captures() {
            return self.clone();
        }

        let parts = self
            .parts
            .iter()
            .flat_map(|part| match part {
                ScopePart::Name(_) => vec![part.clone()],
                ScopePart::Capture(index) => {
                    let captured = captures
                        .get(*index)
                        .copied()
                        .flatten()
                        .and_then(|(start, end)| text.get(start..end));
                    captured_parts(captured.unwrap_or_default())
                }
            })
            .collect();

        Scope { parts }
    }
}

fn is_part_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Turns captured text into name parts, falling back to [`MISSING_CAPTURE`] when nothing
/// usable is left
fn captured_parts(captured: &str) -> Vec<ScopePart> {
    let parts: Vec<ScopePart> = captured
        .split('.')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let name = piece
                .chars()
                .map(|c| if is_part_char(c) { c } else { '_' })
                .collect();
            ScopePart::Name(name)
        })
        .collect();

    if parts.is_empty() {
        vec![ScopePart::Name(MISSING_CAPTURE.to_owned())]
    } else {
        parts
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::new(s)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{self}\")")
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Scope::new(&s).map_err(serde::de::Error::custom)
    }
}

/// The value of a rule `name`/`contentName`: one or more scopes pushed together,
/// eg `"meta.tag.sgml markup.heading"`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScopeName {
    scopes: Vec<Scope>,
}

impl ScopeName {
    pub fn parse(raw: &str) -> ScopelineResult<ScopeName> {
        let scopes = raw
            .split_whitespace()
            .map(Scope::new)
            .collect::<Result<Vec<_>, _>>()?;

        if scopes.is_empty() {
            return Err(Error::InvalidScopeName {
                value: raw.to_owned(),
                reason: "scope name is empty".to_owned(),
            });
        }

        Ok(ScopeName { scopes })
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn has_captures(&self) -> bool {
        self.scopes.iter().any(Scope::has_captures)
    }

    pub fn resolve(&self, text: &str, captures: &[Option<(usize, usize)>]) -> ScopeName {
        ScopeName {
            scopes: self
                .scopes
                .iter()
                .map(|s| s.resolve(text, captures))
                .collect(),
        }
    }

    pub fn into_scopes(self) -> Vec<Scope> {
        self.scopes
    }
}

impl From<Scope> for ScopeName {
    fn from(scope: Scope) -> Self {
        ScopeName {
            scopes: vec![scope],
        }
    }
}

impl FromStr for ScopeName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScopeName::parse(s)
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, scope) in self.scopes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{scope}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeName(\"{self}\")")
    }
}

impl Serialize for ScopeName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ScopeName::parse(&s).map_err(serde::de::Error::custom)
    }
}
