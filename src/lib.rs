mod error;
mod grammars;
mod options;
mod registry;
mod scope;

mod tokenizer;

pub use error::{Diagnostic, DiagnosticKind, Error};
pub use grammars::{
    BeginEnd, BeginWhile, CaptureRules, Grammar, Group, Include, IncludeTarget, Match, ROOT_RULE_ID,
    RawCaptures, RawFlag, RawGrammar, RawRule, Reference, Regex, RegexMatch, Repository, Rule,
    RuleId, RuleKind, RuleRef,
};
pub use options::TokenizeOptions;
pub use registry::{GrammarTree, Registry, RegistrySnapshot};
pub use scope::{MISSING_CAPTURE, Scope, ScopeName, ScopePart};
pub use tokenizer::{LineTokens, MatchStack, StackFrame, Token, Tokenizer};
