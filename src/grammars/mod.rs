mod compiled;
mod raw;
mod reference;
mod regex;

pub use compiled::*;
pub use raw::{RawCaptures, RawFlag, RawGrammar, RawRule};
pub use reference::Reference;
pub use regex::{Regex, RegexCache, RegexMatch, resolve_backreferences};
