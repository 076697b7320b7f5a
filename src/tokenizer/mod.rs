//! Line by line tokenization following the TextMate rules.
//!
//! Every line is tokenized on its own, the only state carried from one line to the next
//! being the [`MatchStack`] returned for the previous line.

use std::collections::HashMap;
use std::ops::{Deref, Range};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::grammars::{
    CaptureRules, Grammar, Regex, RegexMatch, RuleId, RuleKind, RuleRef, resolve_backreferences,
};
use crate::options::TokenizeOptions;
use crate::registry::RegistrySnapshot;
use crate::scope::Scope;

mod stack;

pub use stack::{MatchStack, StackFrame};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<Scope>,
}

/// The result of tokenizing one line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTokens {
    /// Contiguous tokens covering the whole line. Empty for an empty line.
    pub tokens: Vec<Token>,
    /// What to tokenize the next line with
    pub stack: MatchStack,
}

/// Small wrapper so we make we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn starting_at(pos: usize) -> Self {
        Self {
            tokens: Vec::new(),
            last_end_pos: pos,
        }
    }

    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });
        self.last_end_pos = end_pos;
    }

    /// Drops what was produced for the `\n` we added to the line
    fn finalize(&mut self, line_len: usize) {
        self.tokens.retain(|t| t.span.start < line_len);
        if let Some(t) = self.tokens.last_mut() {
            t.span.end = t.span.end.min(line_len);
        }
    }
}

/// What the patterns found on the line being tokenized, keyed by rule.
///
/// A search from `from` finds the leftmost match at or after it, so as long as that match
/// doesn't start before the cursor it is also what a search from the cursor would find.
/// This keeps a pattern matching far away (or nowhere) from being scanned again for every
/// token of the line.
#[derive(Debug, Default)]
struct SearchCache {
    first_line: bool,
    results: HashMap<RuleRef, (usize, Option<RegexMatch>)>,
}

impl SearchCache {
    fn new(first_line: bool) -> Self {
        Self {
            first_line,
            results: HashMap::new(),
        }
    }

    /// `\A` only matches on the first line: results from before it changed are stale
    fn set_first_line(&mut self, first_line: bool) {
        if self.first_line != first_line {
            self.results.clear();
            self.first_line = first_line;
        }
    }

    fn get(&self, rule: &RuleRef, pos: usize) -> Option<Option<&RegexMatch>> {
        let (from, found) = self.results.get(rule)?;
        if *from > pos {
            return None;
        }
        match found {
            Some(m) if m.start < pos => None,
            found => Some(found.as_ref()),
        }
    }

    fn insert(&mut self, rule: RuleRef, from: usize, found: Option<RegexMatch>) {
        self.results.insert(rule, (from, found));
    }
}

/// Where the match that won at some position comes from
enum Candidate {
    /// The end pattern of the innermost frame
    End,
    Rule(RuleRef),
}

/// An end/while regex: either the one from the rule or one built after replacing its
/// back-references
enum EndRegex<'a> {
    Rule(&'a Regex),
    Resolved(Arc<Regex>),
}

impl Deref for EndRegex<'_> {
    type Target = Regex;

    fn deref(&self) -> &Regex {
        match self {
            EndRegex::Rule(re) => *re,
            EndRegex::Resolved(re) => re.as_ref(),
        }
    }
}

/// Captures of the begin pattern, then the end or while pattern with whether it has
/// back-references
fn begin_parts(kind: &RuleKind) -> Option<(&CaptureRules, &Regex, bool)> {
    match kind {
        RuleKind::BeginEnd(b) => Some((&b.begin_captures, &b.end, b.end_has_backrefs)),
        RuleKind::BeginWhile(b) => Some((&b.begin_captures, &b.while_, b.while_has_backrefs)),
        RuleKind::Match(_) | RuleKind::Group(_) | RuleKind::Include(_) => None,
    }
}

/// The byte position of the next character, or one past the end
fn next_char(line: &str, pos: usize) -> usize {
    pos + line
        .get(pos..)
        .and_then(|rest| rest.chars().next())
        .map_or(1, char::len_utf8)
}

#[inline]
pub(crate) fn normalize_string(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Tokenizes text with one grammar of a registry snapshot.
///
/// The snapshot never changes so a tokenizer can keep going while the registry it
/// was created from is modified. Create one per thread if needed, they are cheap.
#[derive(Debug)]
pub struct Tokenizer {
    snapshot: RegistrySnapshot,
    /// The grammar we started with, what `$base` points to
    base: String,
    base_scope: Scope,
    options: TokenizeOptions,
    /// Patterns that can match inside a rule, after following includes
    pattern_cache: HashMap<RuleRef, Arc<[RuleRef]>>,
}

impl Tokenizer {
    pub(crate) fn new(snapshot: RegistrySnapshot, base: &str, options: TokenizeOptions) -> Self {
        let base_scope = snapshot
            .find(base)
            .map(|g| g.scope_name.clone())
            .unwrap_or_default();
        Self {
            snapshot,
            base: base.to_owned(),
            base_scope,
            options,
            pattern_cache: HashMap::new(),
        }
    }

    /// The registry path of the grammar this tokenizer starts with
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The stack to tokenize the first line of a document with
    pub fn initial_stack(&self) -> MatchStack {
        MatchStack::new(RuleRef::root(self.base.clone()), self.base_scope.clone())
    }

    fn grammar(&self, path: &str) -> Option<Arc<Grammar>> {
        self.snapshot.find(path).cloned()
    }

    fn patterns(&mut self, rule: &RuleRef) -> Arc<[RuleRef]> {
        if let Some(patterns) = self.pattern_cache.get(rule) {
            return Arc::clone(patterns);
        }
        let patterns: Arc<[RuleRef]> = self
            .snapshot
            .collect_patterns(&self.base, rule, self.options.max_include_depth)
            .into();
        #[cfg(feature = "debug")]
        log::debug!(
            "[patterns] {} candidate patterns for {rule:?}",
            patterns.len()
        );
        self.pattern_cache.insert(rule.clone(), Arc::clone(&patterns));
        patterns
    }

    fn end_regex<'a>(&self, rule_regex: &'a Regex, resolved: Option<&str>) -> EndRegex<'a> {
        match resolved {
            Some(pattern) => EndRegex::Resolved(self.snapshot.regex_cache.end_pattern(pattern)),
            None => EndRegex::Rule(rule_regex),
        }
    }

    /// Finds the candidate matching first at or after `pos`. On ties the one declared first
    /// wins, the end pattern being declared before the nested patterns unless
    /// `applyEndPatternLast` is set.
    fn find_next(
        &mut self,
        stack: &MatchStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        searches: &mut SearchCache,
    ) -> Option<(Candidate, RegexMatch)> {
        let top = stack.top();
        let patterns = self.patterns(&top.rule);
        let top_grammar = self.grammar(&top.rule.grammar);

        let (end, end_last) = match top_grammar
            .as_deref()
            .and_then(|g| g.rule(top.rule.rule))
            .map(|r| &r.kind)
        {
            Some(RuleKind::BeginEnd(b)) => (
                Some(self.end_regex(&b.end, top.end_pattern.as_deref())),
                b.apply_end_pattern_last,
            ),
            _ => (None, false),
        };

        let mut best: Option<(Candidate, RegexMatch)> = None;

        if !end_last
            && let Some(end) = &end
            && let Some(m) = end.find_at(line, pos, is_first_line)
        {
            if m.start == pos {
                return Some((Candidate::End, m));
            }
            best = Some((Candidate::End, m));
        }

        for rule_ref in patterns.iter() {
            let Some(grammar) = self.snapshot.find(&rule_ref.grammar) else {
                continue;
            };
            let regex = match grammar.rule(rule_ref.rule).map(|r| &r.kind) {
                Some(RuleKind::Match(m)) => &m.regex,
                Some(RuleKind::BeginEnd(b)) => &b.begin,
                Some(RuleKind::BeginWhile(b)) => &b.begin,
                _ => continue,
            };
            // `\G` matches depend on where the search starts
            let cached = if regex.has_anchor_g() {
                None
            } else {
                searches.get(rule_ref, pos).map(|found| found.cloned())
            };
            let found = match cached {
                Some(found) => found,
                None => {
                    let found = regex.find_at(line, pos, is_first_line);
                    if !regex.has_anchor_g() {
                        searches.insert(rule_ref.clone(), pos, found.clone());
                    }
                    found
                }
            };
            let Some(m) = found else {
                continue;
            };
            if best.as_ref().is_some_and(|(_, b)| b.start <= m.start) {
                continue;
            }
            let is_done = m.start == pos;
            best = Some((Candidate::Rule(rule_ref.clone()), m));
            if is_done {
                break;
            }
        }

        if end_last
            && let Some(end) = &end
            && let Some(m) = end.find_at(line, pos, is_first_line)
            && best.as_ref().is_none_or(|(_, b)| m.start < b.start)
        {
            best = Some((Candidate::End, m));
        }

        best
    }

    /// Check if there is a while condition active and if it's still true.
    /// Frames are checked from the outermost one, each successful while match consuming
    /// what it matched. The first failing one is popped with everything above it.
    fn check_while_conditions(
        &mut self,
        mut stack: MatchStack,
        line: &str,
        pos: &mut usize,
        acc: &mut TokenAccumulator,
        is_first_line: &mut bool,
    ) -> MatchStack {
        let mut depth = 1;
        while depth < stack.depth() {
            let frame = &stack.frames()[depth];
            let rule_ref = frame.rule.clone();
            let content_scopes = frame.content_scopes.clone();
            let Some(grammar) = self.grammar(&rule_ref.grammar) else {
                depth += 1;
                continue;
            };
            let Some(RuleKind::BeginWhile(b)) = grammar.rule(rule_ref.rule).map(|r| &r.kind) else {
                depth += 1;
                continue;
            };

            let while_re = self.end_regex(&b.while_, frame.end_pattern.as_deref());
            let found = while_re
                .find_at(line, *pos, *is_first_line)
                .filter(|m| m.start == *pos);

            let Some(m) = found else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] `{}` failed at depth {depth}, popping {} frames",
                    while_re.pattern(),
                    stack.depth() - depth
                );
                stack.truncate(depth);
                break;
            };

            acc.produce(*pos, &content_scopes);
            if !b.while_captures.is_empty() {
                let while_stack = stack.prefix(depth + 1);
                self.resolve_captures(
                    &while_stack,
                    line,
                    &rule_ref.grammar,
                    &b.while_captures,
                    &m.captures,
                    acc,
                    *is_first_line,
                );
            }
            acc.produce(m.end, &content_scopes);

            if m.end > *pos {
                *pos = m.end;
                *is_first_line = false;
            }
            depth += 1;
        }

        stack
    }

    /// Applies the capture rules to the groups of a match.
    /// Capture rules with patterns get their range tokenized again with those patterns.
    #[allow(clippy::too_many_arguments)]
    fn resolve_captures(
        &mut self,
        stack: &MatchStack,
        line: &str,
        grammar_path: &str,
        rule_captures: &CaptureRules,
        captures: &[Option<(usize, usize)>],
        accumulator: &mut TokenAccumulator,
        is_first_line: bool,
    ) {
        if rule_captures.is_empty() {
            return;
        }
        let Some(grammar) = self.grammar(grammar_path) else {
            return;
        };

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

        for (capture_rule, capture) in rule_captures.iter().zip(captures) {
            let (Some(rule_id), Some((cap_start, cap_end))) = (capture_rule, capture) else {
                continue;
            };
            let (cap_start, cap_end) = (*cap_start, *cap_end);
            // Nothing captured
            if cap_start == cap_end {
                continue;
            }
            let Some(rule) = grammar.rule(*rule_id) else {
                continue;
            };

            // pop captures while needed
            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                accumulator.produce(*end_pos, scopes);
                local_stack.pop();
            }

            if let Some((scopes, _)) = local_stack.last() {
                accumulator.produce(cap_start, scopes);
            } else {
                accumulator.produce(cap_start, stack.scopes());
            }

            if rule.has_patterns()
                && stack.depth() < self.options.max_stack_depth
                && let Some(substring) = line.get(..cap_end)
            {
                let mut name_scopes = stack.scopes().to_vec();
                name_scopes.extend(rule.name_scopes(line, captures));
                let mut content_scopes = name_scopes.clone();
                content_scopes.extend(rule.content_scopes(line, captures));

                let mut retokenization_stack = stack.clone();
                retokenization_stack.push_with_scopes(
                    self.rule_ref(grammar_path, *rule_id),
                    Some(cap_start),
                    name_scopes,
                );
                retokenization_stack.set_content_scopes(content_scopes);

                #[cfg(feature = "debug")]
                log::debug!(
                    "[resolve_captures] Retokenizing capture at [{cap_start}..{cap_end}]: {:?}",
                    &line[cap_start..cap_end]
                );
                let (retokenized, _) = self.tokenize_line_at(
                    retokenization_stack,
                    substring,
                    cap_start,
                    is_first_line && cap_start == 0,
                    false,
                );

                for token in retokenized.tokens {
                    accumulator.produce(token.span.end, &token.scopes);
                }
                continue;
            }

            let rule_scopes = rule.name_scopes(line, captures);
            if !rule_scopes.is_empty() {
                let mut base = if let Some((scopes, _)) = local_stack.last() {
                    scopes.clone()
                } else {
                    stack.scopes().to_vec()
                };
                base.extend(rule_scopes);
                local_stack.push((base, cap_end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            accumulator.produce(end_pos, &scopes);
        }
    }

    fn rule_ref(&self, grammar: &str, rule: RuleId) -> RuleRef {
        RuleRef {
            grammar: grammar.to_owned(),
            rule,
        }
    }

    /// Tokenizes `line` from `line_pos`. `line` is expected to end with the `\n` we add,
    /// except when re-tokenizing a capture.
    fn tokenize_line_at(
        &mut self,
        mut stack: MatchStack,
        line: &str,
        line_pos: usize,
        mut is_first_line: bool,
        check_while_conditions: bool,
    ) -> (TokenAccumulator, MatchStack) {
        let mut accumulator = TokenAccumulator::starting_at(line_pos);
        let mut searches = SearchCache::new(is_first_line);
        let mut pos = line_pos;

        // 1. We check if the while patterns are still truthy
        if check_while_conditions {
            stack = self.check_while_conditions(
                stack,
                line,
                &mut pos,
                &mut accumulator,
                &mut is_first_line,
            );
        }

        // Every iteration moves forward, pushes or pops so this is never reached by a
        // working grammar. It only bounds what a pathological one can do.
        let mut budget = 4 * (line.len() + 1) + 4 * self.options.max_stack_depth;

        // 2. We check for any matching patterns
        while pos <= line.len() {
            if budget == 0 {
                #[cfg(feature = "debug")]
                log::warn!("[tokenize_line] iteration budget exhausted at {pos}, giving up on the line");
                break;
            }
            budget -= 1;

            searches.set_first_line(is_first_line);
            let Some((candidate, m)) =
                self.find_next(&stack, line, pos, is_first_line, &mut searches)
            else {
                #[cfg(feature = "debug")]
                log::trace!("[tokenize_line] no more matches after {pos}");
                break;
            };

            let has_advanced = m.end > pos;
            // set when nothing was consumed and moving on is the only way to make progress
            let mut skip_char = false;

            match candidate {
                Candidate::End => {
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_line] end matched [{}..{}], popping {:?}",
                        m.start,
                        m.end,
                        stack.top().rule
                    );
                    let top_rule = stack.top().rule.clone();
                    accumulator.produce(m.start, stack.scopes());
                    stack.set_content_scopes(stack.top().name_scopes.clone());

                    if let Some(grammar) = self.grammar(&top_rule.grammar)
                        && let Some(RuleKind::BeginEnd(b)) =
                            grammar.rule(top_rule.rule).map(|r| &r.kind)
                    {
                        self.resolve_captures(
                            &stack,
                            line,
                            &top_rule.grammar,
                            &b.end_captures,
                            &m.captures,
                            &mut accumulator,
                            is_first_line,
                        );
                    }
                    accumulator.produce(m.end, stack.scopes());

                    let popped = stack.pop();
                    // Grammar pushed & popped a rule without advancing
                    if !has_advanced && popped.is_some_and(|f| f.enter_position == Some(pos)) {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_line] empty begin/end at {pos}, skipping a character");
                        skip_char = true;
                    }
                }
                Candidate::Rule(rule_ref) => {
                    let Some(grammar) = self.grammar(&rule_ref.grammar) else {
                        break;
                    };
                    let Some(rule) = grammar.rule(rule_ref.rule) else {
                        break;
                    };

                    accumulator.produce(m.start, stack.scopes());
                    let mut name_scopes = stack.scopes().to_vec();
                    name_scopes.extend(rule.name_scopes(line, &m.captures));

                    if let RuleKind::Match(r) = &rule.kind {
                        #[cfg(feature = "debug")]
                        log::debug!(
                            "[tokenize_line] matched `{}` [{}..{}]",
                            r.regex.pattern(),
                            m.start,
                            m.end
                        );
                        stack.push_with_scopes(rule_ref.clone(), Some(pos), name_scopes);
                        self.resolve_captures(
                            &stack,
                            line,
                            &rule_ref.grammar,
                            &r.captures,
                            &m.captures,
                            &mut accumulator,
                            is_first_line,
                        );
                        accumulator.produce(m.end, stack.scopes());
                        // pop rule immediately since it is a MatchRule
                        stack.pop();
                        skip_char = !has_advanced;
                    } else if let Some((begin_captures, end, end_has_backrefs)) =
                        begin_parts(&rule.kind)
                    {
                        let reentered = !has_advanced
                            && stack
                                .frames()
                                .iter()
                                .any(|f| f.rule == rule_ref && f.enter_position == Some(pos));
                        if reentered {
                            #[cfg(feature = "debug")]
                            log::debug!(
                                "[tokenize_line] {rule_ref:?} already entered at {pos}, skipping a character"
                            );
                            skip_char = true;
                        } else if stack.depth() >= self.options.max_stack_depth {
                            #[cfg(feature = "debug")]
                            log::warn!(
                                "[tokenize_line] stack depth {} reached, {rule_ref:?} handled as a match",
                                stack.depth()
                            );
                            stack.push_with_scopes(rule_ref.clone(), Some(pos), name_scopes);
                            self.resolve_captures(
                                &stack,
                                line,
                                &rule_ref.grammar,
                                begin_captures,
                                &m.captures,
                                &mut accumulator,
                                is_first_line,
                            );
                            accumulator.produce(m.end, stack.scopes());
                            stack.pop();
                            skip_char = !has_advanced;
                        } else {
                            #[cfg(feature = "debug")]
                            log::debug!(
                                "[tokenize_line] pushing {rule_ref:?} at [{}..{}]",
                                m.start,
                                m.end
                            );
                            stack.push_with_scopes(rule_ref.clone(), Some(pos), name_scopes);
                            self.resolve_captures(
                                &stack,
                                line,
                                &rule_ref.grammar,
                                begin_captures,
                                &m.captures,
                                &mut accumulator,
                                is_first_line,
                            );
                            accumulator.produce(m.end, stack.scopes());

                            let mut content_scopes = stack.top().name_scopes.clone();
                            content_scopes.extend(rule.content_scopes(line, &m.captures));
                            stack.set_content_scopes(content_scopes);

                            if end_has_backrefs {
                                stack.set_end_pattern(resolve_backreferences(
                                    end.pattern(),
                                    line,
                                    &m.captures,
                                ));
                            }
                        }
                    }
                }
            }

            if has_advanced {
                pos = m.end;
                is_first_line = false;
            } else if skip_char {
                pos = next_char(line, pos);
            }
        }

        accumulator.produce(line.len(), stack.scopes());
        (accumulator, stack)
    }

    /// Tokenizes a single line, without its line terminator, starting from the stack
    /// returned for the previous line (or [`Tokenizer::initial_stack`] for the first one).
    ///
    /// Never fails: a broken grammar only means fewer scopes.
    pub fn tokenize_line(&mut self, line: &str, stack: MatchStack) -> LineTokens {
        let is_first_line = stack.is_first_line();
        // Always add a new line, some regex expect it
        let text = format!("{line}\n");
        let (mut acc, mut stack) = self.tokenize_line_at(stack, &text, 0, is_first_line, true);
        acc.finalize(line.len());
        stack.end_line();
        LineTokens {
            tokens: acc.tokens,
            stack,
        }
    }

    /// Tokenizes a whole document, one `Vec` of tokens per line.
    /// `\r\n` and `\r` are handled as `\n`.
    pub fn tokenize_string(&mut self, text: &str) -> Vec<Vec<Token>> {
        if text.is_empty() {
            return Vec::new();
        }

        let normalized = normalize_string(text);
        let mut stack = self.initial_stack();
        let mut lines_tokens = Vec::new();
        for line in normalized.split('\n') {
            let res = self.tokenize_line(line, stack);
            lines_tokens.push(res.tokens);
            stack = res.stack;
        }

        lines_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;
    use crate::grammars::RegexCache;

    fn registry_with(grammars: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for json in grammars {
            registry
                .register(Grammar::from_json(json).unwrap(), None)
                .unwrap();
        }
        registry
    }

    fn grammar_with_patterns(patterns: &str) -> String {
        format!(r##"{{ "scopeName": "source.test", "patterns": {patterns} }}"##)
    }

    fn test_tokenizer(patterns: &str) -> Tokenizer {
        registry_with(&[&grammar_with_patterns(patterns)])
            .tokenizer("source.test")
            .unwrap()
    }

    fn format_tokens(line: &str, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            let scopes: Vec<_> = token.scopes.iter().map(|s| s.to_string()).collect();
            out.push_str(&format!(
                "{:?} {}\n",
                &line[token.span.clone()],
                scopes.join(" ")
            ));
        }
        out
    }

    fn assert_covers(line: &str, tokens: &[Token]) {
        let mut expected_start = 0;
        for token in tokens {
            assert_eq!(token.span.start, expected_start, "tokens are not contiguous");
            assert!(token.span.end > token.span.start, "empty token {token:?}");
            expected_start = token.span.end;
        }
        assert_eq!(expected_start, line.len(), "tokens do not cover {line:?}");
    }

    /// Tokenizes every line, checking the tokens cover each of them
    fn tokenize_lines(tokenizer: &mut Tokenizer, lines: &[&str]) -> (String, MatchStack) {
        let mut stack = tokenizer.initial_stack();
        let mut out = String::new();
        for line in lines {
            let res = tokenizer.tokenize_line(line, stack);
            assert_covers(line, &res.tokens);
            out.push_str(&format_tokens(line, &res.tokens));
            out.push_str("--\n");
            stack = res.stack;
        }
        (out, stack)
    }

    const BLOCK_COMMENT: &str = r##"[
        { "name": "comment.block", "contentName": "comment.content", "begin": "/\\*", "end": "\\*/" }
    ]"##;

    #[test]
    fn block_comment_spans_lines() {
        let mut tokenizer = test_tokenizer(BLOCK_COMMENT);
        let first = tokenizer.tokenize_line("/* a", tokenizer.initial_stack());
        assert_eq!(first.stack.depth(), 2);
        let second = tokenizer.tokenize_line("b */", first.stack.clone());
        assert_eq!(second.stack.depth(), 1);

        let (out, _) = tokenize_lines(&mut tokenizer, &["/* a", "b */"]);
        insta::assert_snapshot!(out, @r##"
        "/*" source.test comment.block
        " a" source.test comment.block comment.content
        --
        "b " source.test comment.block comment.content
        "*/" source.test comment.block
        --
        "##);
    }

    #[test]
    fn end_pattern_uses_begin_backreference() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "name": "string.quoted", "begin": "(['\"])", "end": "\\1" } ]"##,
        );
        let res = tokenizer.tokenize_line("'it's'", tokenizer.initial_stack());
        assert_eq!(res.stack.depth(), 2);
        assert_eq!(res.stack.top().end_pattern.as_deref(), Some("'"));
        insta::assert_snapshot!(format_tokens("'it's'", &res.tokens), @r##"
        "'" source.test string.quoted
        "it" source.test string.quoted
        "'" source.test string.quoted
        "s" source.test
        "'" source.test string.quoted
        "##);
        let spans: Vec<_> = res.tokens.iter().map(|t| t.span.clone()).collect();
        assert_eq!(spans, vec![0..1, 1..3, 3..4, 4..5, 5..6]);
    }

    #[test]
    fn backreference_text_is_escaped() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "name": "heredoc", "begin": "<<(\\S+)", "end": "^\\1$" } ]"##,
        );
        let (out, stack) = tokenize_lines(&mut tokenizer, &["<<A.B", "AxB", "A.B", "x"]);
        assert_eq!(stack.depth(), 1);
        insta::assert_snapshot!(out, @r##"
        "<<A.B" source.test heredoc
        --
        "AxB" source.test heredoc
        --
        "A.B" source.test heredoc
        --
        "x" source.test
        --
        "##);
    }

    #[test]
    fn ties_go_to_the_first_declared_pattern() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "match": "ab", "name": "first" }, { "match": "a", "name": "second" } ]"##,
        );
        let res = tokenizer.tokenize_line("ab", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("ab", &res.tokens), @r##""ab" source.test first"##);

        let mut tokenizer = test_tokenizer(
            r##"[ { "match": "a", "name": "first" }, { "match": "ab", "name": "second" } ]"##,
        );
        let res = tokenizer.tokenize_line("ab", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("ab", &res.tokens), @r##"
        "a" source.test first
        "b" source.test
        "##);
    }

    #[test]
    fn earliest_match_wins_over_declaration_order() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "match": "b", "name": "late" }, { "match": "a", "name": "early" } ]"##,
        );
        let res = tokenizer.tokenize_line("ab", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("ab", &res.tokens), @r##"
        "a" source.test early
        "b" source.test late
        "##);
    }

    #[test]
    fn apply_end_pattern_last() {
        let patterns = |flag: u8| {
            format!(
                r##"[ {{ "begin": "\\[", "end": "\\]", "name": "b", "applyEndPatternLast": {flag},
                      "patterns": [ {{ "match": "\\]\\]", "name": "esc" }} ] }} ]"##
            )
        };

        let mut last = test_tokenizer(&patterns(1));
        let res = last.tokenize_line("[a]]]", last.initial_stack());
        insta::assert_snapshot!(format_tokens("[a]]]", &res.tokens), @r##"
        "[" source.test b
        "a" source.test b
        "]]" source.test b esc
        "]" source.test b
        "##);

        let mut first = test_tokenizer(&patterns(0));
        let res = first.tokenize_line("[a]]]", first.initial_stack());
        insta::assert_snapshot!(format_tokens("[a]]]", &res.tokens), @r##"
        "[" source.test b
        "a" source.test b
        "]" source.test b
        "]]" source.test
        "##);
    }

    #[test]
    fn unresolved_include_matches_nothing() {
        let registry = registry_with(&[r##"{
            "scopeName": "source.test",
            "patterns": [ { "include": "#broken" }, { "match": "x", "name": "keyword" } ],
            "repository": { "broken": { "include": "#missing" } }
        }"##]);
        assert_eq!(registry.find("source.test").unwrap().diagnostics().count(), 1);

        let mut tokenizer = registry.tokenizer("source.test").unwrap();
        let res = tokenizer.tokenize_line("axb", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("axb", &res.tokens), @r##"
        "a" source.test
        "x" source.test keyword
        "b" source.test
        "##);
    }

    #[test]
    fn captures_with_nested_patterns() {
        let mut tokenizer = test_tokenizer(
            r##"[ {
                "match": "(\\w+)=(\\d+)",
                "captures": {
                    "1": { "name": "variable" },
                    "2": { "name": "number", "patterns": [ { "match": "0", "name": "zero" } ] }
                }
            } ]"##,
        );
        let res = tokenizer.tokenize_line("x=10", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("x=10", &res.tokens), @r##"
        "x" source.test variable
        "=" source.test
        "1" source.test number
        "0" source.test number zero
        "##);
    }

    #[test]
    fn capture_placeholders_in_names() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "match": "<(\\w+)>(\\d)?", "name": "tag.$1 extra.${2}" } ]"##,
        );
        let res = tokenizer.tokenize_line("<div>", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("<div>", &res.tokens), @r##""<div>" source.test tag.div extra.unmatched"##);
    }

    #[test]
    fn begin_while_continues_and_stops() {
        let mut tokenizer = test_tokenizer(
            r##"[ {
                "name": "quote", "begin": "^>", "while": "^(>)",
                "whileCaptures": { "1": { "name": "marker" } },
                "patterns": [ { "match": "x", "name": "x" } ]
            } ]"##,
        );
        let (out, stack) = tokenize_lines(&mut tokenizer, &["> x", "> y", "z"]);
        assert_eq!(stack.depth(), 1);
        insta::assert_snapshot!(out, @r##"
        ">" source.test quote
        " " source.test quote
        "x" source.test quote x
        --
        ">" source.test quote marker
        " y" source.test quote
        --
        "z" source.test
        --
        "##);
    }

    #[test]
    fn while_is_not_checked_mid_line() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "name": "list", "begin": "^-", "while": "^\\s" } ]"##,
        );
        // the while pattern matches nothing on the begin line but the rule stays open
        let (out, stack) = tokenize_lines(&mut tokenizer, &["- a", "  b", "c"]);
        assert_eq!(stack.depth(), 1);
        insta::assert_snapshot!(out, @r##"
        "-" source.test list
        " a" source.test list
        --
        " " source.test list
        " b" source.test list
        --
        "c" source.test
        --
        "##);
    }

    #[test]
    fn base_and_self_follow_the_starting_grammar() {
        let outer = r##"{
            "scopeName": "source.outer",
            "patterns": [ { "begin": "<", "end": ">", "name": "tag", "patterns": [ { "include": "source.inner" } ] } ]
        }"##;
        let inner = r##"{
            "scopeName": "source.inner",
            "patterns": [
                { "match": "i", "name": "inner.i" },
                { "begin": "\\(", "end": "\\)", "name": "paren", "patterns": [ { "include": "$base" } ] }
            ]
        }"##;
        let registry = registry_with(&[outer, inner]);

        let mut tokenizer = registry.tokenizer("source.outer").unwrap();
        let res = tokenizer.tokenize_line("<i(<i>)>", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("<i(<i>)>", &res.tokens), @r##"
        "<" source.outer tag
        "i" source.outer tag inner.i
        "(" source.outer tag paren
        "<" source.outer tag paren tag
        "i" source.outer tag paren tag inner.i
        ">" source.outer tag paren tag
        ")" source.outer tag paren
        ">" source.outer tag
        "##);

        let mut tokenizer = registry.tokenizer("source.inner").unwrap();
        let res = tokenizer.tokenize_line("(i)", tokenizer.initial_stack());
        insta::assert_snapshot!(format_tokens("(i)", &res.tokens), @r##"
        "(" source.inner paren
        "i" source.inner paren inner.i
        ")" source.inner paren
        "##);
    }

    #[test]
    fn zero_length_matches_terminate() {
        let mut tokenizer = test_tokenizer(r##"[ { "match": "", "name": "empty" }, { "match": "(?=b)" } ]"##);
        let res = tokenizer.tokenize_line("abc", tokenizer.initial_stack());
        assert_covers("abc", &res.tokens);
        // every empty match cuts the line, neighbours with the same scopes are not merged
        insta::assert_snapshot!(format_tokens("abc", &res.tokens), @r##"
        "a" source.test
        "b" source.test
        "c" source.test
        "##);

        // multi-byte characters are skipped whole
        let res = tokenizer.tokenize_line("日本", res.stack);
        assert_covers("日本", &res.tokens);
        let spans: Vec<_> = res.tokens.iter().map(|t| t.span.clone()).collect();
        assert_eq!(spans, vec![0..3, 3..6]);
    }

    #[test]
    fn empty_begin_end_terminates() {
        let mut tokenizer = test_tokenizer(r##"[ { "begin": "(?=a)", "end": "(?=a)", "name": "loop" } ]"##);
        let res = tokenizer.tokenize_line("aa", tokenizer.initial_stack());
        assert_covers("aa", &res.tokens);
        assert_eq!(res.stack.depth(), 1);
        assert!(res.tokens.iter().all(|t| t.scopes.len() == 1));
    }

    #[test]
    fn empty_begin_is_not_reentered() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "begin": "(?=a)", "end": "b", "name": "loop", "patterns": [ { "include": "$self" } ] } ]"##,
        );
        let res = tokenizer.tokenize_line("a", tokenizer.initial_stack());
        assert_eq!(res.stack.depth(), 2);
        insta::assert_snapshot!(format_tokens("a", &res.tokens), @r##""a" source.test loop"##);
    }

    #[test]
    fn empty_begin_after_a_gap_is_entered_again() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "begin": "(?=a)", "end": "b", "name": "loop", "patterns": [ { "include": "$self" } ] } ]"##,
        );
        // the first frame records the cursor (0), not where its begin matched (1)
        let res = tokenizer.tokenize_line(" a", tokenizer.initial_stack());
        assert_eq!(res.stack.depth(), 3);
        insta::assert_snapshot!(format_tokens(" a", &res.tokens), @r##"
        " " source.test
        "a" source.test loop loop
        "##);
    }

    #[test]
    fn stack_depth_is_capped() {
        let registry = registry_with(&[&grammar_with_patterns(
            r##"[ { "begin": "\\(", "end": "\\)", "name": "p", "patterns": [ { "include": "$self" } ] } ]"##,
        )]);
        let mut tokenizer = registry
            .tokenizer_with_options("source.test", TokenizeOptions::default().max_stack_depth(3))
            .unwrap();
        let res = tokenizer.tokenize_line("((((", tokenizer.initial_stack());
        assert_eq!(res.stack.depth(), 3);
        insta::assert_snapshot!(format_tokens("((((", &res.tokens), @r##"
        "(" source.test p
        "(" source.test p p
        "(" source.test p p p
        "(" source.test p p p
        "##);
    }

    #[test]
    fn self_recursion_terminates_with_default_options() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "begin": "\\(", "end": "\\)", "name": "p", "patterns": [ { "include": "$self" } ] } ]"##,
        );
        let line = "(".repeat(1000);
        let res = tokenizer.tokenize_line(&line, tokenizer.initial_stack());
        assert_covers(&line, &res.tokens);
        assert_eq!(res.stack.depth(), 256);
    }

    #[test]
    fn anchors() {
        let mut tokenizer = test_tokenizer(
            r##"[
                { "match": "\\Aa", "name": "start" },
                { "match": "\\Gb", "name": "glued" },
                { "match": "a", "name": "plain" }
            ]"##,
        );
        let (out, _) = tokenize_lines(&mut tokenizer, &["ab", "ab", "a b"]);
        insta::assert_snapshot!(out, @r##"
        "a" source.test start
        "b" source.test glued
        --
        "a" source.test plain
        "b" source.test glued
        --
        "a" source.test plain
        " b" source.test
        --
        "##);
    }

    #[test]
    fn end_of_document_never_reached() {
        let mut tokenizer = test_tokenizer(r##"[ { "begin": "%%", "end": "\\z", "name": "raw" } ]"##);
        let (_, stack) = tokenize_lines(&mut tokenizer, &["%%", "a", ""]);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn stack_can_be_persisted() {
        let mut tokenizer = test_tokenizer(BLOCK_COMMENT);
        let first = tokenizer.tokenize_line("x /* a", tokenizer.initial_stack());

        let json = serde_json::to_string(&first.stack).unwrap();
        let restored: MatchStack = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, first.stack);

        let from_original = tokenizer.tokenize_line("b */ c", first.stack);
        let from_restored = tokenizer.tokenize_line("b */ c", restored);
        assert_eq!(from_original, from_restored);
    }

    #[test]
    fn stack_with_captured_scopes_can_be_persisted() {
        let registry = registry_with(&[include_str!("../fixtures/comments.json")]);
        let mut tokenizer = registry.tokenizer("source.comments").unwrap();
        let first = tokenizer.tokenize_line("x = 'abc", tokenizer.initial_stack());
        assert_eq!(first.stack.depth(), 2);
        let scopes: Vec<_> = first.stack.scopes().iter().map(|s| s.to_string()).collect();
        assert_eq!(scopes, vec!["source.comments", "string.quoted._"]);

        let json = serde_json::to_string(&first.stack).unwrap();
        let restored: MatchStack = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, first.stack);

        let from_original = tokenizer.tokenize_line("d' y", first.stack);
        let from_restored = tokenizer.tokenize_line("d' y", restored);
        assert_eq!(from_original, from_restored);
        assert_eq!(from_restored.stack.depth(), 1);
        insta::assert_snapshot!(format_tokens("d' y", &from_restored.tokens), @r##"
        "d" source.comments string.quoted._
        "'" source.comments string.quoted._
        " y" source.comments
        "##);
    }

    #[test]
    fn resolved_end_patterns_stay_bounded() {
        let mut tokenizer = test_tokenizer(
            r##"[ { "name": "heredoc", "begin": "<<(\\w+)", "end": "^\\1$" } ]"##,
        );
        for i in 0..RegexCache::CAPACITY + 200 {
            let res = tokenizer.tokenize_line(&format!("<<D{i}"), tokenizer.initial_stack());
            assert_eq!(res.stack.depth(), 2);
        }
        let cached = tokenizer.snapshot.regex_cache.len();
        assert!(cached > 0 && cached <= RegexCache::CAPACITY, "{cached} patterns cached");
    }

    #[test]
    fn search_results_are_reused_until_the_cursor_passes_them() {
        let rule = RuleRef::root("source.test");
        let m = RegexMatch {
            start: 5,
            end: 6,
            captures: vec![Some((5, 6))],
        };
        let mut searches = SearchCache::new(true);
        searches.insert(rule.clone(), 2, Some(m.clone()));
        // searched from after the cursor
        assert!(searches.get(&rule, 1).is_none());
        assert_eq!(searches.get(&rule, 2), Some(Some(&m)));
        assert_eq!(searches.get(&rule, 5), Some(Some(&m)));
        // the match is behind the cursor
        assert!(searches.get(&rule, 6).is_none());

        searches.insert(rule.clone(), 3, None);
        assert_eq!(searches.get(&rule, 100), Some(None));
        searches.set_first_line(true);
        assert_eq!(searches.get(&rule, 100), Some(None));
        searches.set_first_line(false);
        assert!(searches.get(&rule, 100).is_none());
    }

    #[test]
    fn long_line_with_many_patterns() {
        let mut patterns: Vec<String> = (0..30)
            .map(|i| format!(r##"{{ "match": "never{i}", "name": "never" }}"##))
            .collect();
        patterns.push(r##"{ "match": "\\Gb", "name": "glued" }"##.to_owned());
        patterns.push(r##"{ "match": "a", "name": "a" }"##.to_owned());
        let mut tokenizer = test_tokenizer(&format!("[{}]", patterns.join(",")));

        let line = "ab".repeat(5000);
        let res = tokenizer.tokenize_line(&line, tokenizer.initial_stack());
        assert_covers(&line, &res.tokens);
        assert_eq!(res.tokens.len(), 10_000);
        assert!(res.tokens.iter().all(|t| t.scopes.len() == 2));
        assert!(res.tokens.iter().all(|t| t.scopes[1].to_string() != "never"));
    }

    #[test]
    fn stale_stack_does_not_panic() {
        let mut tokenizer = test_tokenizer(BLOCK_COMMENT);
        let res = tokenizer.tokenize_line("/* a", tokenizer.initial_stack());

        // same stack, but the grammar it points to is gone
        let mut other = registry_with(&[r##"{ "scopeName": "source.other" }"##])
            .tokenizer("source.other")
            .unwrap();
        let res = other.tokenize_line("b */ c", res.stack);
        assert_covers("b */ c", &res.tokens);
        assert_eq!(res.stack.depth(), 2);
    }

    #[test]
    fn empty_lines_have_no_tokens() {
        let mut tokenizer = test_tokenizer(BLOCK_COMMENT);
        let res = tokenizer.tokenize_line("", tokenizer.initial_stack());
        assert!(res.tokens.is_empty());
        assert!(!res.stack.is_first_line());
    }

    #[test]
    fn tokenize_string_normalizes_line_endings() {
        let mut tokenizer = test_tokenizer(BLOCK_COMMENT);
        let unix = tokenizer.tokenize_string("a /*\nb */\n");
        let windows = tokenizer.tokenize_string("a /*\r\nb */\r\n");
        let mac = tokenizer.tokenize_string("a /*\rb */\r");
        assert_eq!(unix.len(), 3);
        assert_eq!(unix, windows);
        assert_eq!(unix, mac);
        assert!(tokenizer.tokenize_string("").is_empty());
    }

    #[test]
    fn tokens_cover_every_line_of_fixtures() {
        let registry = registry_with(&[
            include_str!("../fixtures/comments.json"),
            include_str!("../fixtures/quote.json"),
            include_str!("../fixtures/broken.json"),
        ]);
        let inputs = [
            "/* multi",
            "line */ x = 'a\\'b' // rest",
            "> quoted \"str\" 12",
            "> more é 日本",
            "",
            "plain \t text /* é",
            "*/",
        ];
        for (path, _) in registry.grammars() {
            let mut tokenizer = registry.tokenizer(&path).unwrap();
            tokenize_lines(&mut tokenizer, &inputs);
        }
    }
}
