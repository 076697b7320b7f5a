use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};

use onig::{Region, RegexOptions, SearchOptions, Syntax};

/// Anchors that must not match get replaced by this, which no text contains.
const NEVER_MATCHES: &str = "\u{FFFF}";

/// Byte offset of each backslash escape in the pattern, with the escaped character.
/// `\\` is an escape of its own so `\\A` is not an `\A` anchor.
fn escapes(pattern: &str) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut chars = pattern.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\'
            && let Some((_, escaped)) = chars.next()
        {
            out.push((i, escaped));
        }
    }
    out
}

fn has_escape(pattern: &str, letters: &[char]) -> bool {
    escapes(pattern).iter().any(|(_, c)| letters.contains(c))
}

/// Replaces the escapes `\X` for every X in `letters`.
fn replace_escapes<'a>(pattern: &'a str, letters: &[char], replacement: &str) -> Cow<'a, str> {
    let targets: Vec<usize> = escapes(pattern)
        .into_iter()
        .filter(|(_, c)| letters.contains(c))
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        return Cow::Borrowed(pattern);
    }

    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;
    for i in targets {
        out.push_str(&pattern[last..i]);
        out.push_str(replacement);
        // all the anchor letters are ASCII so the escape is 2 bytes
        last = i + 2;
    }
    out.push_str(&pattern[last..]);
    Cow::Owned(out)
}

/// Escapes the regex metacharacters in captured text before pasting it into a pattern
fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Replaces `\1`, `\2`... with the (escaped) text those groups captured in `text`.
/// A group that did not participate is replaced by nothing.
///
/// Example:
/// - Begin pattern: "(['\"`])"  (captures quote type)
/// - End pattern: "\\1"        (must match same quote type)
/// - If we captured '"', the end pattern becomes: '"'
pub fn resolve_backreferences(
    pattern: &str,
    text: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;

    for (i, c) in escapes(pattern) {
        if !c.is_ascii_digit() || c == '0' || i < last {
            continue;
        }
        let digits_start = i + 1;
        let digits_len = pattern[digits_start..]
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let digits_end = digits_start + digits_len;
        let Ok(group) = pattern[digits_start..digits_end].parse::<usize>() else {
            continue;
        };

        out.push_str(&pattern[last..i]);
        if let Some(captured) = captures
            .get(group)
            .copied()
            .flatten()
            .and_then(|(start, end)| text.get(start..end))
        {
            out.push_str(&escape_regex(captured));
        }
        last = digits_end;
    }

    out.push_str(&pattern[last..]);
    out
}

/// Whether the pattern contains numbered back-references like `\1`
pub fn has_backreferences(pattern: &str) -> bool {
    escapes(pattern)
        .iter()
        .any(|(_, c)| c.is_ascii_digit() && *c != '0')
}

/// A successful search: byte offsets into the searched text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
    /// Position of every group, 0 being the whole match
    pub captures: Vec<Option<(usize, usize)>>,
}

/// An Oniguruma pattern with the TextMate anchor rules applied.
///
/// Two versions are compiled lazily: one where `\A` can match (first line of a document)
/// and one where it can't.
pub struct Regex {
    pattern: String,
    /// Source handed to Oniguruma, after the `\z`/`\Z` replacement of end patterns
    source: String,
    has_anchor_a: bool,
    has_anchor_g: bool,
    compiled: [OnceLock<Option<Arc<onig::Regex>>>; 2],
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Self {
            pattern: self.pattern.clone(),
            source: self.source.clone(),
            has_anchor_a: self.has_anchor_a,
            has_anchor_g: self.has_anchor_g,
            compiled: Default::default(),
        }
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        let source = pattern.clone();
        Self::with_source(pattern, source)
    }

    /// For `end` patterns: the end of the document is never reached while scanning a line
    /// so `\z` and `\Z` must never match.
    pub fn end_pattern(pattern: String) -> Self {
        let source = replace_escapes(&pattern, &['z', 'Z'], NEVER_MATCHES).into_owned();
        Self::with_source(pattern, source)
    }

    fn with_source(pattern: String, source: String) -> Self {
        Self {
            has_anchor_a: has_escape(&source, &['A']),
            has_anchor_g: has_escape(&source, &['G']),
            pattern,
            source,
            compiled: Default::default(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn has_backreferences(&self) -> bool {
        has_backreferences(&self.pattern)
    }

    /// Whether the pattern uses `\G`, making its matches depend on where the search starts
    pub fn has_anchor_g(&self) -> bool {
        self.has_anchor_g
    }

    fn compile(source: &str) -> Result<onig::Regex, onig::Error> {
        onig::Regex::with_options(
            source,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::default(),
        )
    }

    fn compiled(&self, allow_a: bool) -> Option<&Arc<onig::Regex>> {
        let allow_a = allow_a || !self.has_anchor_a;
        let slot = usize::from(!allow_a);
        self.compiled[slot]
            .get_or_init(|| {
                let source = if allow_a {
                    Cow::Borrowed(self.source.as_str())
                } else {
                    replace_escapes(&self.source, &['A'], NEVER_MATCHES)
                };
                Self::compile(&source).ok().map(Arc::new)
            })
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully
    pub fn validate(&self) -> Result<(), String> {
        Self::compile(&self.source)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Finds the first match starting at or after `pos`.
    ///
    /// `text` is searched as a whole so look-behinds can see what comes before `pos`.
    /// `\A` only matches when `is_first_line` is set and a pattern using `\G` only
    /// counts if it matches right at `pos`.
    pub fn find_at(&self, text: &str, pos: usize, is_first_line: bool) -> Option<RegexMatch> {
        if pos > text.len() {
            return None;
        }
        let re = self.compiled(is_first_line)?;
        let mut region = Region::new();
        re.search_with_options(
            text,
            pos,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let (start, end) = region.pos(0)?;
        if self.has_anchor_g && start != pos {
            return None;
        }

        Some(RegexMatch {
            start,
            end,
            captures: (0..region.len()).map(|i| region.pos(i)).collect(),
        })
    }
}

/// Compiled end/while patterns built at tokenization time after back-reference
/// substitution, shared by every tokenizer of a registry and safe to use across threads.
#[derive(Clone, Default)]
pub struct RegexCache {
    map: Arc<papaya::HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    /// How many resolved patterns the cache holds before starting over.
    /// Keys come from document text (heredoc delimiters, quotes...) so it has to be bounded.
    pub const CAPACITY: usize = 1024;

    /// Gets or builds the end pattern for that source
    pub fn end_pattern(&self, pattern: &str) -> Arc<Regex> {
        let map = self.map.pin();
        if let Some(re) = map.get(pattern) {
            return re.clone();
        }
        if map.len() >= Self::CAPACITY {
            #[cfg(feature = "debug")]
            log::debug!("[regex_cache] {} patterns cached, clearing", Self::CAPACITY);
            map.clear();
        }
        let re = Arc::new(Regex::end_pattern(pattern.to_owned()));
        map.insert(pattern.to_owned(), re.clone());
        re
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RegexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegexCache({} patterns)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_reuses_and_stays_bounded() {
        let cache = RegexCache::default();
        let first = cache.end_pattern("'");
        assert!(Arc::ptr_eq(&first, &cache.end_pattern("'")));
        assert_eq!(cache.len(), 1);

        for i in 0..RegexCache::CAPACITY * 3 {
            cache.end_pattern(&format!("^D{i}$"));
            assert!(cache.len() <= RegexCache::CAPACITY);
        }
        // clones share the same map
        assert_eq!(cache.clone().len(), cache.len());
    }

    #[test]
    fn finds_match_with_captures() {
        let re = Regex::new(r"(\w+)=(\d+)?".to_owned());
        let m = re.find_at("let  x=", 0, false).unwrap();
        assert_eq!((m.start, m.end), (5, 7));
        assert_eq!(m.captures, vec![Some((5, 7)), Some((5, 6)), None]);
    }

    #[test]
    fn searches_from_position_with_lookbehind() {
        let re = Regex::new(r"(?<=a)b".to_owned());
        let m = re.find_at("ab", 1, false).unwrap();
        assert_eq!((m.start, m.end), (1, 2));
    }

    #[test]
    fn anchor_a_only_on_first_line() {
        let re = Regex::new(r"\Afoo".to_owned());
        assert!(re.find_at("foo", 0, true).is_some());
        assert!(re.find_at("foo", 0, false).is_none());
    }

    #[test]
    fn anchor_g_only_at_position() {
        let re = Regex::new(r"\G\s*x".to_owned());
        assert!(re.find_at("ab  x", 2, false).is_some());
        assert!(re.find_at("ab  x", 1, false).is_none());
    }

    #[test]
    fn end_patterns_never_match_end_of_document() {
        let re = Regex::end_pattern(r"\z".to_owned());
        assert!(re.find_at("", 0, true).is_none());
        assert!(re.find_at("abc\n", 0, false).is_none());
        // an escaped backslash followed by z is a literal
        let re = Regex::end_pattern(r"\\z".to_owned());
        assert!(re.find_at(r"a\z", 0, false).is_some());
    }

    #[test]
    fn invalid_regex_does_not_match() {
        let re = Regex::new("(unclosed".to_owned());
        assert!(re.validate().is_err());
        assert!(re.find_at("(unclosed", 0, true).is_none());
    }

    #[test]
    fn detects_backreferences() {
        assert!(has_backreferences(r"\1"));
        assert!(has_backreferences(r"</(\w+)\12>"));
        assert!(!has_backreferences(r"\\1"));
        assert!(!has_backreferences(r"\0"));
        assert!(!has_backreferences(r"abc"));
    }

    #[test]
    fn resolves_backreferences_with_escaping() {
        let text = "<<EOF.x";
        let captures = vec![Some((0, 7)), Some((2, 7)), None];
        assert_eq!(
            resolve_backreferences(r"^\1$", text, &captures),
            r"^EOF\.x$"
        );
        assert_eq!(resolve_backreferences(r"a\2b", text, &captures), "ab");
        assert_eq!(resolve_backreferences(r"\\1", text, &captures), r"\\1");
    }

    #[test]
    fn cache_returns_same_regex() {
        let cache = RegexCache::default();
        let a = cache.end_pattern("'");
        let b = cache.end_pattern("'");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
