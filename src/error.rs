use std::fmt;
use std::io;

pub(crate) type ScopelineResult<T> = Result<T, Error>;

/// Errors that stop an operation outright.
///
/// Problems inside a grammar (a broken rule, a regex that doesn't compile, an include
/// pointing nowhere) are not errors: they are recorded as [`Diagnostic`]s on the grammar
/// and the rest of it keeps working.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// The grammar definition has no usable identity, eg `scopeName` is missing.
    /// Nothing from such a grammar can be used.
    MalformedGrammarDefinition(String),

    /// A scope name or a registry path did not follow the scope name syntax.
    #[allow(missing_docs)]
    InvalidScopeName { value: String, reason: String },

    /// An include string could not be parsed.
    InvalidReference(String),

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize with a grammar we can't find
    GrammarNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::MalformedGrammarDefinition(reason) => {
                write!(f, "malformed grammar definition: {}", reason)
            }
            Error::InvalidScopeName { value, reason } => {
                write!(f, "invalid scope name '{}': {}", value, reason)
            }
            Error::InvalidReference(value) => write!(f, "invalid include reference '{}'", value),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::MalformedGrammarDefinition(_)
            | Error::InvalidScopeName { .. }
            | Error::InvalidReference(_)
            | Error::GrammarNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

/// The kind of problem found in a grammar while loading or linking it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiagnosticKind {
    /// A `name`/`contentName` was not a valid scope name. The rule is kept without it.
    #[allow(missing_docs)]
    InvalidScopeName { value: String, reason: String },
    /// An `include` string could not be parsed. The rule is dropped.
    InvalidReference(String),
    /// A rule has the defining keys of several rule shapes. The rule is dropped.
    AmbiguousRuleShape(Vec<&'static str>),
    /// A rule has none of the defining keys of a rule shape. The rule is dropped.
    EmptyRule,
    /// A capture map key was not a group index. The capture is ignored.
    InvalidCaptureKey(String),
    /// A regex did not compile. The rule is disabled.
    #[allow(missing_docs)]
    RegexCompile { pattern: String, message: String },
    /// An include could not be bound to a rule. It matches nothing.
    UnresolvedReference(String),
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::InvalidScopeName { value, reason } => {
                write!(f, "invalid scope name '{}': {}", value, reason)
            }
            DiagnosticKind::InvalidReference(value) => {
                write!(f, "invalid include reference '{}'", value)
            }
            DiagnosticKind::AmbiguousRuleShape(keys) => {
                write!(f, "rule matches several shapes ({})", keys.join(", "))
            }
            DiagnosticKind::EmptyRule => f.write_str("rule has no match, begin, include or patterns"),
            DiagnosticKind::InvalidCaptureKey(key) => write!(f, "invalid capture key '{}'", key),
            DiagnosticKind::RegexCompile { pattern, message } => {
                write!(f, "regex '{}' failed to compile: {}", pattern, message)
            }
            DiagnosticKind::UnresolvedReference(value) => {
                write!(f, "include '{}' could not be resolved", value)
            }
        }
    }
}

/// A recoverable problem found in a grammar, with the location of the raw node
/// that caused it, eg `repository.string.patterns[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: String,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub(crate) fn new(location: impl Into<String>, kind: DiagnosticKind) -> Self {
        let diagnostic = Self {
            location: location.into(),
            kind,
        };
        #[cfg(feature = "debug")]
        log::warn!("[grammar] {diagnostic}");
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.location, self.kind)
        }
    }
}
