use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, ScopelineResult};
use crate::grammars::{Grammar, IncludeTarget, RegexCache, RuleKind, RuleRef};
use crate::options::TokenizeOptions;
use crate::scope::Scope;
use crate::tokenizer::Tokenizer;

/// A node of the grammar tree. A node without a grammar is abstract: it only exists
/// because something is registered under it.
#[derive(Debug, Clone, Default)]
struct Node {
    grammar: Option<Arc<Grammar>>,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn collect<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Arc<Grammar>)>) {
        for (segment, child) in &self.children {
            let path = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{prefix}.{segment}")
            };
            if let Some(grammar) = &child.grammar {
                out.push((path.clone(), grammar));
            }
            child.collect(&path, out);
        }
    }

    /// Removes the grammar at `segments` and prunes the node if nothing hangs from it.
    fn remove(&mut self, segments: &[&str]) -> Option<Arc<Grammar>> {
        let (first, rest) = segments.split_first()?;
        let child = self.children.get_mut(*first)?;
        if !rest.is_empty() {
            return child.remove(rest);
        }

        let grammar = child.grammar.take()?;
        if child.children.is_empty() {
            self.children.remove(*first);
        }
        Some(grammar)
    }
}

/// Grammars keyed by dotted path, `source.js` living under the `source` node.
#[derive(Debug, Clone, Default)]
pub struct GrammarTree {
    root: Node,
}

impl GrammarTree {
    fn node(&self, path: &str) -> Option<&Node> {
        path.split('.')
            .try_fold(&self.root, |node, segment| node.children.get(segment))
    }

    /// Returns the node at that path, creating abstract nodes on the way if needed
    fn node_mut_or_create(&mut self, path: &str) -> &mut Node {
        path.split('.').fold(&mut self.root, |node, segment| {
            node.children.entry(segment.to_owned()).or_default()
        })
    }

    /// The grammar registered at exactly that path
    pub fn get(&self, path: &str) -> Option<&Arc<Grammar>> {
        self.node(path)?.grammar.as_ref()
    }

    pub fn is_abstract(&self, path: &str) -> bool {
        self.node(path).is_some_and(|n| n.grammar.is_none())
    }

    /// Every concrete grammar with its path, in path order
    pub fn grammars(&self) -> Vec<(String, &Arc<Grammar>)> {
        let mut out = Vec::new();
        self.root.collect("", &mut out);
        out
    }

    /// Puts the grammar at that path. If the node already exists (abstract or not) it is
    /// reused so anything registered below it stays reachable.
    fn insert(&mut self, path: &str, grammar: Arc<Grammar>) -> Option<Arc<Grammar>> {
        self.node_mut_or_create(path).grammar.replace(grammar)
    }

    fn remove(&mut self, path: &str) -> Option<Arc<Grammar>> {
        let segments: Vec<&str> = path.split('.').collect();
        self.root.remove(&segments)
    }

    /// Takes the grammar out of its node without touching the tree shape
    fn remove_grammar(&mut self, path: &str) -> Option<Arc<Grammar>> {
        path.split('.')
            .try_fold(&mut self.root, |node, segment| node.children.get_mut(segment))?
            .grammar
            .take()
    }

    /// Paths of the grammars including something from `path`
    fn dependents(&self, path: &str) -> Vec<String> {
        self.grammars()
            .into_iter()
            .filter(|(_, g)| g.external_scopes().any(|s| s == path))
            .map(|(p, _)| p)
            .collect()
    }
}

fn validate_path(path: &str) -> ScopelineResult<()> {
    let scope = Scope::new(path)?;
    if scope.has_captures() {
        return Err(Error::InvalidScopeName {
            value: path.to_owned(),
            reason: "registry paths can't contain capture placeholders".to_owned(),
        });
    }
    Ok(())
}

/// The main struct in scopeline.
///
/// Holds all the grammars, links them to each other and hands out tokenizers. Every mutation
/// relinks the grammars it affects. Tokenizers work on a snapshot taken when they are
/// created: changing the registry afterwards doesn't change what they see.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tree: Arc<GrammarTree>,
    /// end/while patterns built from back-references, shared with every snapshot
    regex_cache: RegexCache,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the file and registers it under its own scope name, returning that name.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> ScopelineResult<String> {
        let grammar = Grammar::load_from_file(path)?;
        let scope = grammar.scope_name.to_string();
        self.register(grammar, None)?;
        Ok(scope)
    }

    /// Registers a grammar at `path`, or at its scope name if not given.
    ///
    /// Missing intermediate nodes are created as abstract nodes. An existing node at that
    /// path is kept and gets the grammar, replacing the previous one if any.
    /// The grammar and every grammar including something from that path are relinked.
    pub fn register(&mut self, grammar: Grammar, path: Option<&str>) -> ScopelineResult<()> {
        let path = match path {
            Some(p) => p.to_owned(),
            None => grammar.scope_name.to_string(),
        };
        validate_path(&path)?;

        let _previous = Arc::make_mut(&mut self.tree).insert(&path, Arc::new(grammar));
        #[cfg(feature = "debug")]
        log::debug!(
            "[register] {path}{}",
            if _previous.is_some() { " (replaced)" } else { "" }
        );

        let mut affected = vec![path.clone()];
        affected.extend(self.tree.dependents(&path).into_iter().filter(|p| p != &path));
        self.relink(&affected);
        Ok(())
    }

    /// Removes the grammar at `path` and returns it.
    ///
    /// A node with children becomes abstract instead of being removed. Grammars including
    /// something from that path are relinked and will report the includes as unresolved.
    pub fn unregister(&mut self, path: &str) -> Option<Arc<Grammar>> {
        self.tree.get(path)?;
        let removed = Arc::make_mut(&mut self.tree).remove(path)?;
        #[cfg(feature = "debug")]
        log::debug!("[unregister] {path}");

        let affected = self.tree.dependents(path);
        self.relink(&affected);
        Some(removed)
    }

    /// The grammar registered at exactly that path, `None` for abstract or missing nodes.
    pub fn find(&self, path: &str) -> Option<&Grammar> {
        self.tree.get(path).map(Arc::as_ref)
    }

    /// Checks whether a grammar is registered at that path
    pub fn contains_grammar(&self, path: &str) -> bool {
        self.tree.get(path).is_some()
    }

    /// Whether that path is a placeholder node without grammar
    pub fn is_abstract(&self, path: &str) -> bool {
        self.tree.is_abstract(path)
    }

    /// Every registered grammar with the path it is registered at
    pub fn grammars(&self) -> impl Iterator<Item = (String, &Grammar)> {
        self.tree
            .grammars()
            .into_iter()
            .map(|(path, grammar)| (path, &**grammar))
    }

    /// The first grammar, in path order, handling that file extension.
    /// A leading `.` is ignored.
    pub fn find_by_file_type(&self, file_type: &str) -> Option<(String, &Grammar)> {
        let file_type = file_type.strip_prefix('.').unwrap_or(file_type);
        self.grammars()
            .find(|(_, g)| {
                g.file_types
                    .iter()
                    .any(|ft| ft.strip_prefix('.').unwrap_or(ft) == file_type)
            })
    }

    /// Relinks every grammar. Only useful if the same grammars should be linked again
    /// from scratch, registering and unregistering already relink what they affect.
    pub fn relink_all(&mut self) {
        let paths: Vec<String> = self.tree.grammars().into_iter().map(|(p, _)| p).collect();
        self.relink(&paths);
    }

    fn relink(&mut self, paths: &[String]) {
        for path in paths {
            // taken out of the tree so it is the only owner unless a snapshot holds it
            let Some(mut grammar) = Arc::make_mut(&mut self.tree).remove_grammar(path) else {
                continue;
            };
            Arc::make_mut(&mut grammar).link(path, &self.tree);
            Arc::make_mut(&mut self.tree).insert(path, grammar);
        }
    }

    /// A read-only view of the registry as it is now
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            tree: Arc::clone(&self.tree),
            regex_cache: self.regex_cache.clone(),
        }
    }

    /// A tokenizer starting with the grammar at `path`, with the default options.
    pub fn tokenizer(&self, path: &str) -> ScopelineResult<Tokenizer> {
        self.tokenizer_with_options(path, TokenizeOptions::default())
    }

    pub fn tokenizer_with_options(
        &self,
        path: &str,
        options: TokenizeOptions,
    ) -> ScopelineResult<Tokenizer> {
        if !self.contains_grammar(path) {
            return Err(Error::GrammarNotFound(path.to_owned()));
        }
        Ok(Tokenizer::new(self.snapshot(), path, options))
    }
}

/// The registry at some point in time. Cheap to clone and to send to other threads.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    tree: Arc<GrammarTree>,
    pub(crate) regex_cache: RegexCache,
}

impl RegistrySnapshot {
    pub fn find(&self, path: &str) -> Option<&Arc<Grammar>> {
        self.tree.get(path)
    }

    fn get_rule_patterns(
        &self,
        base: &str,
        rule_ref: RuleRef,
        visited: &mut HashSet<RuleRef>,
        depth: usize,
        max_depth: usize,
        out: &mut Vec<RuleRef>,
    ) {
        if depth > max_depth {
            #[cfg(feature = "debug")]
            log::debug!("[collect_patterns] include depth {max_depth} reached at {rule_ref:?}");
            return;
        }
        if !visited.insert(rule_ref.clone()) {
            return;
        }
        let Some(rule) = self.find(&rule_ref.grammar).and_then(|g| g.rule(rule_ref.rule)) else {
            return;
        };
        if rule.disabled {
            return;
        }

        match &rule.kind {
            RuleKind::Match(_) | RuleKind::BeginEnd(_) | RuleKind::BeginWhile(_) => {
                out.push(rule_ref)
            }
            RuleKind::Group(group) => {
                for pattern in &group.patterns {
                    let child = RuleRef {
                        grammar: rule_ref.grammar.clone(),
                        rule: *pattern,
                    };
                    self.get_rule_patterns(base, child, visited, depth + 1, max_depth, out);
                }
            }
            RuleKind::Include(include) => {
                let target = match &include.target {
                    Some(IncludeTarget::Rule(target)) => target.clone(),
                    Some(IncludeTarget::Base) => RuleRef::root(base),
                    None => return,
                };
                self.get_rule_patterns(base, target, visited, depth + 1, max_depth, out);
            }
        }
    }

    /// The match, begin/end and begin/while rules that can match inside `rule_ref`,
    /// in declaration order, going through groups and includes.
    /// `base` is the path of the grammar `$base` points to.
    pub(crate) fn collect_patterns(
        &self,
        base: &str,
        rule_ref: &RuleRef,
        max_depth: usize,
    ) -> Vec<RuleRef> {
        let mut out = Vec::new();
        let Some(rule) = self.find(&rule_ref.grammar).and_then(|g| g.rule(rule_ref.rule)) else {
            return out;
        };
        let mut visited = HashSet::new();
        // a begin rule including itself (through `$self` say) is a valid candidate
        if matches!(rule.kind, RuleKind::Group(_)) {
            visited.insert(rule_ref.clone());
        }
        for pattern in rule.patterns() {
            let child = RuleRef {
                grammar: rule_ref.grammar.clone(),
                rule: *pattern,
            };
            self.get_rule_patterns(base, child, &mut visited, 1, max_depth, &mut out);
        }
        out
    }
}
