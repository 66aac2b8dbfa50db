//! Parse cache.
//!
//! Parsing is pure, so each distinct `(grammar, source)` pair is parsed once
//! and the resulting tree is shared. Compilation is *not* cached: the same
//! tree compiles differently under different bindings and macro results.
//!
//! The cache is populated lazily by [`ParseCache::parse`] and can be warmed
//! up front with [`ParseCache::precache`] so latency-sensitive turns never pay
//! for parsing.

use super::expr::{Expr, Grammar};
use super::parser;
use crate::error::GrammarSyntaxError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct ParseCache {
    trees: RwLock<HashMap<(Grammar, String), Arc<Expr>>>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`, reusing a previously parsed tree when available.
    ///
    /// Syntax errors are not cached; a failing source is re-parsed (and fails
    /// again) on every call.
    pub fn parse(&self, source: &str, grammar: Grammar) -> Result<Arc<Expr>, GrammarSyntaxError> {
        let key = (grammar, source.to_string());
        {
            let trees = self.trees.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(tree) = trees.get(&key) {
                return Ok(Arc::clone(tree));
            }
        }

        let tree = Arc::new(parser::parse(source, grammar)?);
        let mut trees = self.trees.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(trees.entry(key).or_insert(tree)))
    }

    /// Eagerly parse every source; stops at the first syntax error.
    pub fn precache<'a, I>(&self, grammar: Grammar, sources: I) -> Result<usize, GrammarSyntaxError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut count = 0;
        for source in sources {
            self.parse(source, grammar)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of cached trees.
    pub fn len(&self) -> usize {
        self.trees.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
