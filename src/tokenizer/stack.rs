use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grammars::RuleRef;
use crate::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// The rule that opened this frame, the grammar root for the bottom frame
    pub rule: RuleRef,
    /// "name" scopes - applied to begin/end delimiters
    pub name_scopes: Vec<Scope>,
    /// "contentName" scopes - applied to content between delimiters
    pub content_scopes: Vec<Scope>,
    /// The end/while pattern with its back-references replaced by what the begin
    /// pattern captured. `None` if the pattern has no back-references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_pattern: Option<String>,
    /// The cursor position when this frame was pushed during the current line, used to detect
    /// rules opening and closing without consuming anything. `None` from the next line on.
    ///
    /// This is where the search started, not where the begin pattern matched: a zero-width
    /// begin found after a gap is entered once more before the guard kicks in.
    #[serde(skip)]
    pub enter_position: Option<usize>,
}

/// Everything needed to carry on tokenizing on the next line: the begin/end and
/// begin/while rules currently open, from the grammar root to the innermost one.
///
/// It is a plain value: hosts can keep the one returned for each line and restart
/// tokenizing from any line later on.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StackData")]
pub struct MatchStack {
    frames: Vec<StackFrame>,
    /// `\A` can only match on the first line of a document
    first_line: bool,
}

#[derive(Deserialize)]
struct StackData {
    frames: Vec<StackFrame>,
    first_line: bool,
}

impl TryFrom<StackData> for MatchStack {
    type Error = &'static str;

    fn try_from(data: StackData) -> Result<Self, Self::Error> {
        if data.frames.is_empty() {
            return Err("a match stack needs at least the grammar root frame");
        }
        Ok(Self {
            frames: data.frames,
            first_line: data.first_line,
        })
    }
}

impl MatchStack {
    /// The stack to tokenize the first line of a document with
    pub fn new(root: RuleRef, grammar_scope: Scope) -> Self {
        Self {
            frames: vec![StackFrame {
                rule: root,
                name_scopes: vec![grammar_scope.clone()],
                content_scopes: vec![grammar_scope],
                end_pattern: None,
                enter_position: None,
            }],
            first_line: true,
        }
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_first_line(&self) -> bool {
        self.first_line
    }

    /// The scopes applying to text outside of any match at the end of the stack
    pub fn scopes(&self) -> &[Scope] {
        &self.top().content_scopes
    }

    pub(crate) fn push_with_scopes(
        &mut self,
        rule: RuleRef,
        enter_position: Option<usize>,
        scopes: Vec<Scope>,
    ) {
        self.frames.push(StackFrame {
            rule,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
            end_pattern: None,
            enter_position,
        });
    }

    pub(crate) fn set_content_scopes(&mut self, content_scopes: Vec<Scope>) {
        self.top_mut().content_scopes = content_scopes;
    }

    pub(crate) fn set_end_pattern(&mut self, end_pattern: String) {
        self.top_mut().end_pattern = Some(end_pattern);
    }

    /// Exits the current context, getting back to the parent. The root frame is never popped.
    pub(crate) fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Keeps the first `depth` frames, and always the root one
    pub(crate) fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    /// A copy of the first `depth` frames
    pub(crate) fn prefix(&self, depth: usize) -> Self {
        Self {
            frames: self.frames[..depth.clamp(1, self.frames.len())].to_vec(),
            first_line: self.first_line,
        }
    }

    /// Called once a line is done: positions only make sense within a line
    pub(crate) fn end_line(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
        }
        self.first_line = false;
    }

    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    pub(crate) fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }
}

impl fmt::Debug for MatchStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MatchStack (first_line={}):", self.first_line)?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{}grammar={}, rule={}",
                indent, frame.rule.grammar, frame.rule.rule.0
            )?;

            let join = |scopes: &[Scope]| {
                scopes
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            if !frame.name_scopes.is_empty() {
                write!(f, " name=[{}]", join(&frame.name_scopes))?;
            }
            if frame.content_scopes != frame.name_scopes {
                write!(f, ", content=[{}]", join(&frame.content_scopes))?;
            }
            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern=\"{}\"", pattern)?;
            }
            if let Some(enter_pos) = frame.enter_position {
                write!(f, ", enter_pos={}", enter_pos)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(s: &str) -> Scope {
        Scope::new(s).unwrap()
    }

    #[test]
    fn root_is_never_popped() {
        let mut stack = MatchStack::new(RuleRef::root("source.test"), scope("source.test"));
        assert!(stack.pop().is_none());
        stack.push_with_scopes(RuleRef::root("source.test"), Some(0), vec![scope("a")]);
        stack.push_with_scopes(RuleRef::root("source.test"), Some(1), vec![scope("b")]);
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.prefix(2).depth(), 2);
        assert_eq!(stack.prefix(0).depth(), 1);
        stack.truncate(0);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.scopes(), &[scope("source.test")]);
    }

    #[test]
    fn end_line_clears_positions() {
        let mut stack = MatchStack::new(RuleRef::root("source.test"), scope("source.test"));
        stack.push_with_scopes(RuleRef::root("source.test"), Some(4), vec![scope("a")]);
        assert!(stack.is_first_line());
        stack.end_line();
        assert!(!stack.is_first_line());
        assert!(stack.frames().iter().all(|f| f.enter_position.is_none()));
    }

    #[test]
    fn empty_stack_does_not_deserialize() {
        let res = serde_json::from_str::<MatchStack>(r##"{"frames": [], "first_line": false}"##);
        assert!(res.is_err());
    }
}
