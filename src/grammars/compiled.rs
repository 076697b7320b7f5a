use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, DiagnosticKind, Error, ScopelineResult};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::reference::Reference;
use crate::grammars::regex::Regex;
use crate::registry::GrammarTree;
use crate::scope::{Scope, ScopeName};

/// Capture keys above that are ignored, nothing needs that many groups
const MAX_CAPTURE_INDEX: usize = 1024;

pub const ROOT_RULE_ID: RuleId = RuleId(0);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// A rule of a grammar in the registry, the grammar being identified by the path
/// it was registered at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub grammar: String,
    pub rule: RuleId,
}

impl RuleRef {
    pub fn root(grammar: impl Into<String>) -> Self {
        Self {
            grammar: grammar.into(),
            rule: ROOT_RULE_ID,
        }
    }
}

/// Repository key -> rule, sorted so walking it is deterministic
pub type Repository = BTreeMap<String, RuleId>;

/// Per group index, the rule assigning a scope (and maybe patterns) to that group
pub type CaptureRules = Vec<Option<RuleId>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeTarget {
    Rule(RuleRef),
    /// `$base` is bound when tokenizing
    Base,
}

/// A list of patterns without a regex of its own. Capture rules are groups too.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub patterns: Vec<RuleId>,
    /// Only set for capture rules
    pub content_name: Option<ScopeName>,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub regex: Regex,
    pub captures: CaptureRules,
}

#[derive(Debug, Clone)]
pub struct BeginEnd {
    pub begin: Regex,
    pub begin_captures: CaptureRules,
    pub end: Regex,
    pub end_has_backrefs: bool,
    pub end_captures: CaptureRules,
    pub content_name: Option<ScopeName>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone)]
pub struct BeginWhile {
    pub begin: Regex,
    pub begin_captures: CaptureRules,
    pub while_: Regex,
    pub while_has_backrefs: bool,
    pub while_captures: CaptureRules,
    pub content_name: Option<ScopeName>,
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone)]
pub struct Include {
    pub reference: Reference,
    /// None until linked, or if the reference could not be resolved
    pub target: Option<IncludeTarget>,
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Group(Group),
    Match(Match),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Include(Include),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    /// Where the rule comes from in the grammar definition
    pub location: String,
    pub comment: Option<String>,
    pub name: Option<ScopeName>,
    pub repository: Repository,
    pub disabled: bool,
    /// Position in the pre-order walk of the grammar, set when linking
    pub index: Option<usize>,
    /// The enclosing rule, set when linking. Navigation only, the grammar owns every rule.
    pub parent: Option<RuleId>,
    /// Set when linking if the rule was reached through a repository
    pub repository_key: Option<String>,
    pub kind: RuleKind,
}

impl Rule {
    /// The nested patterns of that rule, if it can have some
    pub fn patterns(&self) -> &[RuleId] {
        match &self.kind {
            RuleKind::Group(g) => &g.patterns,
            RuleKind::BeginEnd(b) => &b.patterns,
            RuleKind::BeginWhile(b) => &b.patterns,
            RuleKind::Match(_) | RuleKind::Include(_) => &[],
        }
    }

    pub fn content_name(&self) -> Option<&ScopeName> {
        match &self.kind {
            RuleKind::Group(g) => g.content_name.as_ref(),
            RuleKind::BeginEnd(b) => b.content_name.as_ref(),
            RuleKind::BeginWhile(b) => b.content_name.as_ref(),
            RuleKind::Match(_) | RuleKind::Include(_) => None,
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns().is_empty()
    }

    /// Every capture rule, in the order begin/match captures then end/while captures
    fn capture_rules(&self) -> impl Iterator<Item = RuleId> + '_ {
        let maps: [&[Option<RuleId>]; 2] = match &self.kind {
            RuleKind::Match(m) => [m.captures.as_slice(), &[]],
            RuleKind::BeginEnd(b) => [b.begin_captures.as_slice(), b.end_captures.as_slice()],
            RuleKind::BeginWhile(b) => [
                b.begin_captures.as_slice(),
                b.while_captures.as_slice(),
            ],
            RuleKind::Group(_) | RuleKind::Include(_) => [&[], &[]],
        };
        maps.into_iter().flatten().filter_map(|r| *r)
    }

    /// The scopes of `name`, with placeholders filled from the match
    pub fn name_scopes(&self, text: &str, captures: &[Option<(usize, usize)>]) -> Vec<Scope> {
        self.name
            .as_ref()
            .map(|n| n.resolve(text, captures).into_scopes())
            .unwrap_or_default()
    }

    /// The scopes of `contentName`, with placeholders filled from the match
    pub fn content_scopes(&self, text: &str, captures: &[Option<(usize, usize)>]) -> Vec<Scope> {
        self.content_name()
            .map(|n| n.resolve(text, captures).into_scopes())
            .unwrap_or_default()
    }
}

enum Shape {
    Group,
    Match,
    BeginEnd,
    BeginWhile,
    Include(Reference),
}

/// Decides which kind of rule a raw node is from the keys it has
fn classify(raw: &RawRule) -> Result<Shape, DiagnosticKind> {
    let mut defining = Vec::new();
    if raw.match_.is_some() {
        defining.push("match");
    }
    if raw.begin.is_some() {
        defining.push("begin");
    }
    if raw.include.is_some() {
        defining.push("include");
    }
    if defining.len() > 1 {
        return Err(DiagnosticKind::AmbiguousRuleShape(defining));
    }

    let has_end = raw.end.is_some();
    let has_while = raw.while_.is_some();

    match defining.first().copied() {
        Some("match") if has_end || has_while => {
            let other = if has_end { "end" } else { "while" };
            Err(DiagnosticKind::AmbiguousRuleShape(vec!["match", other]))
        }
        Some("match") => Ok(Shape::Match),
        Some("begin") => match (has_end, has_while) {
            (true, true) => Err(DiagnosticKind::AmbiguousRuleShape(vec!["end", "while"])),
            (true, false) => Ok(Shape::BeginEnd),
            (false, true) => Ok(Shape::BeginWhile),
            (false, false) => Err(DiagnosticKind::EmptyRule),
        },
        Some(_) if raw.patterns.is_some() => Err(DiagnosticKind::AmbiguousRuleShape(vec![
            "include", "patterns",
        ])),
        Some(_) => {
            let include = raw.include.as_deref().unwrap_or_default();
            Reference::parse(include)
                .map(Shape::Include)
                .map_err(|_| DiagnosticKind::InvalidReference(include.to_owned()))
        }
        None if raw.patterns.is_some() && !has_end && !has_while => Ok(Shape::Group),
        None => Err(DiagnosticKind::EmptyRule),
    }
}

/// A loaded grammar: an arena of rules, rule 0 being the root.
///
/// Includes are stored as references and bound to rule indices by [`Grammar::link`],
/// which the registry calls whenever grammars they may point to change.
#[derive(Debug, Clone)]
pub struct Grammar {
    /// Display name
    pub name: Option<String>,
    pub scope_name: Scope,
    pub file_types: Vec<String>,
    pub first_line_match: Option<String>,
    pub folding_start_marker: Option<String>,
    pub folding_stop_marker: Option<String>,
    pub uuid: Option<String>,
    rules: Vec<Rule>,
    /// The registry path it was last linked at
    path: String,
    rule_order: Vec<RuleId>,
    repository_index: HashMap<String, RuleId>,
    load_diagnostics: Vec<Diagnostic>,
    link_diagnostics: Vec<Diagnostic>,
}

impl Grammar {
    pub fn from_raw(raw: RawGrammar) -> ScopelineResult<Self> {
        let raw_scope = raw.scope_name.ok_or_else(|| {
            Error::MalformedGrammarDefinition("missing required `scopeName`".to_owned())
        })?;
        let scope_name = Scope::new(raw_scope.trim())?;
        if scope_name.has_captures() {
            return Err(Error::InvalidScopeName {
                value: raw_scope,
                reason: "grammar scope names can't contain capture placeholders".to_owned(),
            });
        }

        let mut grammar = Self {
            name: raw.name,
            path: scope_name.to_string(),
            scope_name: scope_name.clone(),
            file_types: raw.file_types,
            first_line_match: raw.first_line_match,
            folding_start_marker: raw.folding_start_marker,
            folding_stop_marker: raw.folding_stop_marker,
            uuid: raw.uuid,
            rules: Vec::new(),
            rule_order: Vec::new(),
            repository_index: HashMap::new(),
            load_diagnostics: Vec::new(),
            link_diagnostics: Vec::new(),
        };

        let root_id = grammar.reserve(String::new());
        debug_assert_eq!(root_id, ROOT_RULE_ID);
        let patterns = grammar.load_patterns(raw.patterns, "");
        let repository = grammar.load_repository(raw.repository, "");
        let root = &mut grammar.rules[root_id.as_index()];
        root.name = Some(ScopeName::from(scope_name));
        root.repository = repository;
        root.kind = RuleKind::Group(Group {
            patterns,
            content_name: None,
        });
        // so other grammars can find our nested repository entries before we are linked
        grammar.assign_indices();

        #[cfg(feature = "debug")]
        log::debug!(
            "[load] {} rules loaded for {}, {} diagnostics",
            grammar.rules.len(),
            grammar.scope_name,
            grammar.load_diagnostics.len()
        );

        Ok(grammar)
    }

    pub fn from_json(json: &str) -> ScopelineResult<Self> {
        Self::from_raw(RawGrammar::from_json(json)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> ScopelineResult<Self> {
        Self::from_raw(RawGrammar::load_from_file(path)?)
    }

    /// The last part of the scope name: `rust` for `source.rust`
    pub fn language_name(&self) -> Option<&str> {
        self.scope_name.language()
    }

    /// The registry path of this grammar, its scope name until registered elsewhere
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.as_index())
    }

    pub fn root(&self) -> &Rule {
        &self.rules[ROOT_RULE_ID.as_index()]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Every rule reachable from the root in pre-order, as computed by the last link.
    /// `rule.index` is the position of a rule in that list.
    pub fn rule_order(&self) -> &[RuleId] {
        &self.rule_order
    }

    /// Every repository key found anywhere in the grammar, the first one found
    /// in pre-order winning
    pub fn repository_index(&self) -> &HashMap<String, RuleId> {
        &self.repository_index
    }

    /// A repository entry as seen from another grammar: top-level repository first
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.root()
            .repository
            .get(name)
            .or_else(|| self.repository_index.get(name))
            .copied()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.load_diagnostics.iter().chain(self.link_diagnostics.iter())
    }

    /// Paths of the other grammars this grammar includes
    pub fn external_scopes(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| match &r.kind {
            RuleKind::Include(i) => i.reference.external_scope(),
            _ => None,
        })
    }

    /// All the scopes used by `name` and `contentName` in this grammar, without duplicates,
    /// in the order they are first found walking patterns, then repositories, then captures.
    ///
    /// The grammar's own scope comes first: it is the name of the root rule and the outermost
    /// scope of every token.
    pub fn scope_names(&self) -> Vec<Scope> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in &self.rule_order {
            let rule = &self.rules[id.as_index()];
            let names = rule.name.iter().chain(rule.content_name());
            for scope in names.flat_map(ScopeName::scopes) {
                if seen.insert(scope.clone()) {
                    out.push(scope.clone());
                }
            }
        }
        out
    }

    fn reserve(&mut self, location: String) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule {
            id,
            location,
            comment: None,
            name: None,
            repository: Repository::new(),
            disabled: false,
            index: None,
            parent: None,
            repository_key: None,
            kind: RuleKind::Group(Group::default()),
        });
        id
    }

    fn diagnostic(&mut self, location: &str, kind: DiagnosticKind) {
        self.load_diagnostics.push(Diagnostic::new(location, kind));
    }

    fn load_scope_name(&mut self, raw: Option<String>, location: &str) -> Option<ScopeName> {
        let raw = raw?;
        match ScopeName::parse(&raw) {
            Ok(name) => Some(name),
            Err(Error::InvalidScopeName { value, reason }) => {
                self.diagnostic(location, DiagnosticKind::InvalidScopeName { value, reason });
                None
            }
            Err(e) => {
                self.diagnostic(
                    location,
                    DiagnosticKind::InvalidScopeName {
                        value: raw,
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }

    /// Returns the regex and whether it is usable.
    /// Patterns with back-references can only be checked once substituted.
    fn load_regex(&mut self, pattern: String, end: bool, location: &str) -> (Regex, bool) {
        let re = if end {
            Regex::end_pattern(pattern)
        } else {
            Regex::new(pattern)
        };
        if end && re.has_backreferences() {
            return (re, true);
        }
        match re.validate() {
            Ok(()) => (re, true),
            Err(message) => {
                self.diagnostic(
                    location,
                    DiagnosticKind::RegexCompile {
                        pattern: re.pattern().to_owned(),
                        message,
                    },
                );
                (re, false)
            }
        }
    }

    fn load_patterns(&mut self, raw: Vec<RawRule>, location: &str) -> Vec<RuleId> {
        raw.into_iter()
            .enumerate()
            .filter_map(|(i, r)| self.load_rule(r, format!("{location}patterns[{i}]")))
            .collect()
    }

    fn load_repository(
        &mut self,
        raw: BTreeMap<String, RawRule>,
        location: &str,
    ) -> Repository {
        raw.into_iter()
            .filter_map(|(key, r)| {
                let id = self.load_rule(r, format!("{location}repository.{key}"))?;
                Some((key, id))
            })
            .collect()
    }

    fn load_captures(&mut self, raw: Option<RawCaptures>, location: &str) -> CaptureRules {
        let Some(raw) = raw else {
            return Vec::new();
        };

        let mut out: CaptureRules = Vec::new();
        for (key, rule) in raw {
            let index = match key.parse::<usize>() {
                Ok(i) if i <= MAX_CAPTURE_INDEX => i,
                _ => {
                    self.diagnostic(location, DiagnosticKind::InvalidCaptureKey(key));
                    continue;
                }
            };
            let id = self.load_capture_rule(rule, format!("{location}.{key}"));
            if out.len() <= index {
                out.resize(index + 1, None);
            }
            out[index] = Some(id);
        }
        out
    }

    /// Capture rules only look at `name`, `contentName` and `patterns`
    fn load_capture_rule(&mut self, raw: RawRule, location: String) -> RuleId {
        let id = self.reserve(location.clone());
        let name = self.load_scope_name(raw.name, &location);
        let content_name = self.load_scope_name(raw.content_name, &location);
        let patterns = self.load_patterns(raw.patterns.unwrap_or_default(), &format!("{location}."));
        let repository = self.load_repository(raw.repository.unwrap_or_default(), &format!("{location}."));

        let rule = &mut self.rules[id.as_index()];
        rule.comment = raw.comment;
        rule.name = name;
        rule.repository = repository;
        rule.kind = RuleKind::Group(Group {
            patterns,
            content_name,
        });
        id
    }

    /// Loads a rule and everything under it. Returns `None` if the rule was dropped,
    /// in which case a diagnostic has been recorded.
    fn load_rule(&mut self, raw: RawRule, location: String) -> Option<RuleId> {
        let shape = match classify(&raw) {
            Ok(shape) => shape,
            Err(kind) => {
                self.diagnostic(&location, kind);
                return None;
            }
        };

        let id = self.reserve(location.clone());
        let prefix = format!("{location}.");
        let mut disabled = raw.disabled.is_some_and(|d| d.is_set());
        let name = self.load_scope_name(raw.name, &location);
        let repository = self.load_repository(raw.repository.unwrap_or_default(), &prefix);

        let kind = match shape {
            Shape::Include(reference) => RuleKind::Include(Include {
                reference,
                target: None,
            }),
            Shape::Group => RuleKind::Group(Group {
                patterns: self.load_patterns(raw.patterns.unwrap_or_default(), &prefix),
                content_name: None,
            }),
            Shape::Match => {
                let (regex, ok) =
                    self.load_regex(raw.match_.unwrap_or_default(), false, &location);
                disabled |= !ok;
                RuleKind::Match(Match {
                    regex,
                    captures: self.load_captures(raw.captures, &format!("{prefix}captures")),
                })
            }
            Shape::BeginEnd => {
                let (begin, begin_ok) =
                    self.load_regex(raw.begin.unwrap_or_default(), false, &location);
                let (end, end_ok) = self.load_regex(raw.end.unwrap_or_default(), true, &location);
                disabled |= !(begin_ok && end_ok);
                let (begin_key, begin_captures) = match raw.begin_captures {
                    Some(c) => ("beginCaptures", Some(c)),
                    None => ("captures", raw.captures.clone()),
                };
                let (end_key, end_captures) = match raw.end_captures {
                    Some(c) => ("endCaptures", Some(c)),
                    None => ("captures", raw.captures),
                };
                RuleKind::BeginEnd(BeginEnd {
                    end_has_backrefs: end.has_backreferences(),
                    begin,
                    begin_captures: self
                        .load_captures(begin_captures, &format!("{prefix}{begin_key}")),
                    end,
                    end_captures: self.load_captures(end_captures, &format!("{prefix}{end_key}")),
                    content_name: self.load_scope_name(raw.content_name, &location),
                    apply_end_pattern_last: raw
                        .apply_end_pattern_last
                        .is_some_and(|f| f.is_set()),
                    patterns: self.load_patterns(raw.patterns.unwrap_or_default(), &prefix),
                })
            }
            Shape::BeginWhile => {
                let (begin, begin_ok) =
                    self.load_regex(raw.begin.unwrap_or_default(), false, &location);
                let (while_, while_ok) =
                    self.load_regex(raw.while_.unwrap_or_default(), true, &location);
                disabled |= !(begin_ok && while_ok);
                let (begin_key, begin_captures) = match raw.begin_captures {
                    Some(c) => ("beginCaptures", Some(c)),
                    None => ("captures", raw.captures.clone()),
                };
                let (while_key, while_captures) = match raw.while_captures {
                    Some(c) => ("whileCaptures", Some(c)),
                    None => ("captures", raw.captures),
                };
                RuleKind::BeginWhile(BeginWhile {
                    while_has_backrefs: while_.has_backreferences(),
                    begin,
                    begin_captures: self
                        .load_captures(begin_captures, &format!("{prefix}{begin_key}")),
                    while_,
                    while_captures: self
                        .load_captures(while_captures, &format!("{prefix}{while_key}")),
                    content_name: self.load_scope_name(raw.content_name, &location),
                    patterns: self.load_patterns(raw.patterns.unwrap_or_default(), &prefix),
                })
            }
        };

        let rule = &mut self.rules[id.as_index()];
        rule.comment = raw.comment;
        rule.name = name;
        rule.repository = repository;
        rule.disabled = disabled;
        rule.kind = kind;
        Some(id)
    }

    /// Pre-order walk over patterns, then repository entries, then captures.
    /// `f` gets the rule, its parent and the repository key it was reached through.
    fn walk(&self, mut f: impl FnMut(RuleId, Option<RuleId>, Option<&str>)) {
        let mut visited = HashSet::new();
        let mut stack: Vec<(RuleId, Option<RuleId>, Option<&str>)> =
            vec![(ROOT_RULE_ID, None, None)];

        while let Some((id, parent, key)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(rule) = self.rule(id) else {
                continue;
            };
            f(id, parent, key);

            let children = rule
                .patterns()
                .iter()
                .map(|c| (*c, Some(id), None))
                .chain(
                    rule.repository
                        .iter()
                        .map(|(k, c)| (*c, Some(id), Some(k.as_str()))),
                )
                .chain(rule.capture_rules().map(|c| (c, Some(id), None)));
            let start = stack.len();
            stack.extend(children);
            // popped from the end so reverse to keep the declaration order
            stack[start..].reverse();
        }
    }

    /// First pass of linking: pre-order index, parent and repository key of every rule,
    /// plus the harvested repository index. Resets whatever a previous link set.
    fn assign_indices(&mut self) {
        for rule in &mut self.rules {
            rule.index = None;
            rule.parent = None;
            rule.repository_key = None;
        }

        let mut visits = Vec::new();
        self.walk(|id, parent, key| {
            visits.push((id, parent, key.map(str::to_owned)));
        });

        self.rule_order.clear();
        self.repository_index.clear();
        for (id, parent, key) in visits {
            let rule = &mut self.rules[id.as_index()];
            rule.index = Some(self.rule_order.len());
            rule.parent = parent;
            if let Some(key) = &key {
                self.repository_index.entry(key.clone()).or_insert(id);
            }
            rule.repository_key = key;
            self.rule_order.push(id);
        }
    }

    /// Local references look in the repositories of the enclosing rules first,
    /// innermost first, then anywhere in the grammar.
    fn resolve_local(&self, from: RuleId, name: &str) -> Option<RuleId> {
        let mut current = self.rule(from).and_then(|r| r.parent);
        while let Some(id) = current {
            let rule = self.rule(id)?;
            if let Some(target) = rule.repository.get(name) {
                return Some(*target);
            }
            current = rule.parent;
        }
        self.repository_index.get(name).copied()
    }

    fn bind(&self, from: RuleId, reference: &Reference, tree: &GrammarTree) -> Option<IncludeTarget> {
        let target = match reference {
            Reference::Base => return Some(IncludeTarget::Base),
            Reference::SelfGrammar => RuleRef::root(self.path.clone()),
            Reference::Local(name) => RuleRef {
                grammar: self.path.clone(),
                rule: self.resolve_local(from, name)?,
            },
            Reference::External { scope, rule } => {
                let other: &Grammar = if scope == &self.path {
                    self
                } else {
                    tree.get(scope)?
                };
                let rule = match rule {
                    Some(name) => other.repository_rule(name)?,
                    None => ROOT_RULE_ID,
                };
                RuleRef {
                    grammar: scope.clone(),
                    rule,
                }
            }
        };
        Some(IncludeTarget::Rule(target))
    }

    /// Links the grammar as registered at `path`: indexes every rule then binds every
    /// include against its own repositories and the other grammars in `tree`.
    /// `$base` is left to the tokenizer. Can be called any number of times.
    pub fn link(&mut self, path: &str, tree: &GrammarTree) {
        self.path = path.to_owned();
        self.assign_indices();

        let mut bindings = Vec::new();
        let mut diagnostics = Vec::new();
        for id in &self.rule_order {
            let rule = &self.rules[id.as_index()];
            if let RuleKind::Include(include) = &rule.kind {
                let target = self.bind(*id, &include.reference, tree);
                if target.is_none() {
                    diagnostics.push(Diagnostic::new(
                        rule.location.clone(),
                        DiagnosticKind::UnresolvedReference(include.reference.to_string()),
                    ));
                }
                bindings.push((*id, target));
            }
        }

        for (id, target) in bindings {
            if let RuleKind::Include(include) = &mut self.rules[id.as_index()].kind {
                include.target = target;
            }
        }
        self.link_diagnostics = diagnostics;

        #[cfg(feature = "debug")]
        log::debug!(
            "[link] {} linked at {path}: {} rules indexed, {} unresolved includes",
            self.scope_name,
            self.rule_order.len(),
            self.link_diagnostics.len()
        );
    }
}
