use serde::{Deserialize, Serialize};

/// Limits the tokenizer enforces so that a broken or hostile grammar can't recurse forever
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizeOptions {
    /// How many frames can be open at once, capture re-tokenization included.
    /// A begin pattern matching past that is handled like a plain match.
    pub(crate) max_stack_depth: usize,
    /// How many includes can be followed in a row when collecting the patterns of a rule
    pub(crate) max_include_depth: usize,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            max_stack_depth: 256,
            max_include_depth: 256,
        }
    }
}

impl TokenizeOptions {
    pub fn max_stack_depth(mut self, value: usize) -> Self {
        // the root frame always exists
        self.max_stack_depth = value.max(1);
        self
    }

    pub fn max_include_depth(mut self, value: usize) -> Self {
        self.max_include_depth = value;
        self
    }

    pub fn stack_depth_limit(&self) -> usize {
        self.max_stack_depth
    }

    pub fn include_depth_limit(&self) -> usize {
        self.max_include_depth
    }
}
