use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::ScopelineResult;

/// TextMate booleans are usually written as `0`/`1` but some grammars use `true`/`false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawFlag {
    Bool(bool),
    Int(i64),
}

impl RawFlag {
    pub fn is_set(self) -> bool {
        match self {
            RawFlag::Bool(b) => b,
            RawFlag::Int(i) => i != 0,
        }
    }
}

/// Capture groups that assign a scope name to matched text.
/// Keys are group indices written as strings, `"0"` being the whole match.
///
/// # Examples
/// ```json
/// {
///   "1": {
///     "name": "entity.name.function.js",
///     "patterns": []
///   },
///   "2": {
///     "name": "punctuation.definition.parameters.begin.js"
///   }
/// }
/// ```
pub type RawCaptures = BTreeMap<String, RawRule>;

/// Every key a rule can have. Which shape a rule has (match, begin/end, begin/while,
/// include or a plain list of patterns) is decided when loading from which keys are set.
///
/// # Examples
/// ```json
/// {
///   "match": "\\b(function)\\s+(\\w+)\\s*\\(",
///   "name": "meta.function.declaration.js",
///   "captures": {
///     "1": { "name": "storage.type.function.js" },
///     "2": { "name": "entity.name.function.js" }
///   }
/// }
/// ```
///
/// ```json
/// {
///   "name": "comment.block.js",
///   "contentName": "comment.block.content.js",
///   "begin": "/\\*",
///   "end": "\\*/",
///   "captures": {
///     "0": { "name": "punctuation.definition.comment.js" }
///   }
/// }
/// ```
///
/// ```json
/// {
///   "name": "markup.list.numbered.markdown",
///   "begin": "^\\s*(\\d+)\\.",
///   "while": "^\\s*(?=\\d+\\.)",
///   "patterns": [
///     { "include": "#inline" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    #[serde(default)]
    pub comment: Option<String>,
    /// Scope name(s) for the whole match or region
    /// Example: "string.quoted.double.js"
    #[serde(default)]
    pub name: Option<String>,
    /// Scope name(s) for the content between begin and end
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(default, rename(deserialize = "match"))]
    pub match_: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    /// Can reference captures from the begin pattern using \\1, \\2, etc.
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, rename(deserialize = "while"))]
    pub while_: Option<String>,
    /// Reference to patterns to include
    /// - "#name" - reference to repository entry in same grammar
    /// - "source.lang" - reference to another grammar's root patterns
    /// - "source.lang#name" - reference to repository entry in another grammar
    /// - "$self" - reference to current grammar's root patterns
    /// - "$base" - reference to the grammar tokenization started with
    #[serde(default)]
    pub include: Option<String>,
    /// Fallback for begin/end/while captures when the specific ones are not given
    #[serde(default)]
    pub captures: Option<RawCaptures>,
    #[serde(default)]
    pub begin_captures: Option<RawCaptures>,
    #[serde(default)]
    pub end_captures: Option<RawCaptures>,
    #[serde(default)]
    pub while_captures: Option<RawCaptures>,
    #[serde(default)]
    pub patterns: Option<Vec<RawRule>>,
    /// Rules only visible to this rule and its descendants
    #[serde(default)]
    pub repository: Option<BTreeMap<String, RawRule>>,
    /// Whether to try the end pattern after the nested patterns when both match
    /// at the same position
    #[serde(default)]
    pub apply_end_pattern_last: Option<RawFlag>,
    #[serde(default)]
    pub disabled: Option<RawFlag>,
}

/// Top-level structure representing a complete TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "jsx", "mjs"],
///   "firstLineMatch": "^#!.*\\bnode\\b",
///   "foldingStartMarker": "\\{\\s*$",
///   "foldingStopMarker": "^\\s*\\}",
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [
///         { "include": "#keywords" }
///       ]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language
    #[serde(default)]
    pub name: Option<String>,
    /// Unique identifier for this grammar's scope. A grammar without it can't be loaded.
    #[serde(default)]
    pub scope_name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub repository: BTreeMap<String, RawRule>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    #[serde(default)]
    pub folding_start_marker: Option<String>,
    #[serde(default)]
    pub folding_stop_marker: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ScopelineResult<Self> {
        let file = File::open(&path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn from_json(json: &str) -> ScopelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
