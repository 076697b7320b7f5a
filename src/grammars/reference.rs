use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ScopelineResult};
use crate::scope::Scope;

/// The target of an `include`.
///
/// Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`, or a bare repository key
///    without any dot, e.g. `strings`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    /// The root patterns of the grammar containing the include
    SelfGrammar,
    /// The root patterns of the grammar tokenization started with.
    /// Only known at tokenization time.
    Base,
    /// A repository entry of the grammar containing the include
    Local(String),
    /// Another grammar, or one of its repository entries
    External { scope: String, rule: Option<String> },
}

impl Reference {
    pub fn parse(raw: &str) -> ScopelineResult<Reference> {
        let invalid = || Error::InvalidReference(raw.to_owned());

        match raw {
            "$self" => return Ok(Reference::SelfGrammar),
            "$base" => return Ok(Reference::Base),
            "" => return Err(invalid()),
            s if s.starts_with('$') => return Err(invalid()),
            _ => {}
        }

        if raw.matches('#').count() > 1 {
            return Err(invalid());
        }

        let (scope, rule) = match raw.split_once('#') {
            Some((scope, rule)) => (scope, Some(rule)),
            None if raw.contains('.') => (raw, None),
            None => ("", Some(raw)),
        };

        if let Some(rule) = rule
            && rule.trim().is_empty()
        {
            return Err(invalid());
        }

        if scope.is_empty() {
            // `rule` is always set here, `#` alone was rejected above
            return Ok(Reference::Local(rule.unwrap_or_default().to_owned()));
        }

        match Scope::new(scope) {
            Ok(s) if !s.has_captures() => Ok(Reference::External {
                scope: scope.to_owned(),
                rule: rule.map(str::to_owned),
            }),
            _ => Err(invalid()),
        }
    }

    /// The registry path this reference points to, if it points to another grammar
    pub fn external_scope(&self) -> Option<&str> {
        match self {
            Reference::External { scope, .. } => Some(scope),
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::SelfGrammar => f.write_str("$self"),
            Reference::Base => f.write_str("$base"),
            Reference::Local(rule) => write!(f, "#{rule}"),
            Reference::External { scope, rule: None } => f.write_str(scope),
            Reference::External {
                scope,
                rule: Some(rule),
            } => write!(f, "{scope}#{rule}"),
        }
    }
}
