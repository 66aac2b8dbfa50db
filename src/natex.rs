//! Natural-language expressions: the dual-grammar pattern compiler.
//!
//! One surface syntax, two back ends:
//!
//! ```text
//! source text ──parse (parser.rs, cached by cache.rs)──> Arc<Expr>  (expr.rs)
//!                                                          │
//!                     ┌────────────────────────────────────┴──────────────┐
//!                     v                                                   v
//!         nlu.rs: compile to a regex per call                 nlg.rs: reduce to text per call
//!           - bindings read at compile time                     - disjunctions pick at random
//!           - macros inlined as fragments                       - macros inlined as text
//!           - captures folded back into vars                    - unresolved refs => None
//!                     │                                                   │
//!                     v                                                   v
//!             Option<Bindings>                                    Option<Generated>
//! ```
//!
//! Trees are parsed once and compiled many times, because the compiled form
//! depends on the bindings and on whatever the macros return for the current
//! utterance.
//!
//! ## Public surface
//!
//! - [`MatchingExpr`] / [`GenerationExpr`]: a parsed source plus its grammar.
//! - [`ParseCache`]: shared parse results.
//! - [`Expr`], [`Grammar`], [`NodeKinds`]: the tree itself.
//!
//! ## Debugging
//!
//! Compiled patterns and macro faults are traced under the `parlance::natex`
//! target; run with `PARLANCE_LOG=parlance::natex=trace` to see them.

#[path = "natex/cache.rs"]
mod cache;
#[path = "natex/expr.rs"]
mod expr;
#[path = "natex/nlg.rs"]
mod nlg;
#[path = "natex/nlu.rs"]
mod nlu;
#[path = "natex/parser.rs"]
mod parser;

pub use cache::ParseCache;
pub use expr::{Expr, Grammar, NodeKinds};
pub use nlg::Generated;
pub use nlu::CompiledPattern;
pub use parser::parse;

use crate::Bindings;
use crate::api::Options;
use crate::error::{GrammarSyntaxError, MacroFault};
use crate::macro_registry::{MacroArg, MacroRegistry};
use crate::ngrams::NgramContext;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;

/// A parsed matching (NLU) expression.
#[derive(Debug, Clone)]
pub struct MatchingExpr {
    source: String,
    tree: Arc<Expr>,
}

impl MatchingExpr {
    pub fn parse(source: &str) -> Result<Self, GrammarSyntaxError> {
        Ok(MatchingExpr { source: source.to_string(), tree: Arc::new(parse(source, Grammar::Matching)?) })
    }

    /// Parse through `cache`, sharing the tree with earlier parses of `source`.
    pub fn parse_cached(source: &str, cache: &ParseCache) -> Result<Self, GrammarSyntaxError> {
        Ok(MatchingExpr { source: source.to_string(), tree: cache.parse(source, Grammar::Matching)? })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &Expr {
        &self.tree
    }

    /// Compile against the current bindings without matching.
    pub fn compile(&self, ngrams: &NgramContext, vars: &Bindings, macros: &MacroRegistry) -> CompiledPattern {
        nlu::compile(&self.tree, ngrams, vars, macros)
    }

    /// Match the utterance in `ngrams`; on success, the updated copy of `vars`.
    pub fn matches(
        &self,
        ngrams: &NgramContext,
        vars: &Bindings,
        macros: &MacroRegistry,
        options: &Options,
    ) -> Option<Bindings> {
        self.compile(ngrams, vars, macros).matches(ngrams, options.backtrack_limit)
    }
}

impl fmt::Display for MatchingExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A parsed generation (NLG) expression.
#[derive(Debug, Clone)]
pub struct GenerationExpr {
    source: String,
    tree: Arc<Expr>,
}

impl GenerationExpr {
    pub fn parse(source: &str) -> Result<Self, GrammarSyntaxError> {
        Ok(GenerationExpr { source: source.to_string(), tree: Arc::new(parse(source, Grammar::Generation)?) })
    }

    pub fn parse_cached(source: &str, cache: &ParseCache) -> Result<Self, GrammarSyntaxError> {
        Ok(GenerationExpr { source: source.to_string(), tree: cache.parse(source, Grammar::Generation)? })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &Expr {
        &self.tree
    }

    /// Reduce to text; `None` if a variable is unresolved or a macro failed.
    pub fn generate<R>(&self, vars: &Bindings, macros: &MacroRegistry, rng: &mut R) -> Option<Generated>
    where
        R: RngCore + ?Sized,
    {
        nlg::generate(&self.tree, vars, macros, rng)
    }
}

impl fmt::Display for GenerationExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Evaluate the arguments of a macro call, innermost calls first.
///
/// A fault in a nested call faults the whole call.
fn macro_args(
    args: &[Expr],
    ngrams: &NgramContext,
    vars: &mut Bindings,
    macros: &MacroRegistry,
) -> Result<Vec<MacroArg>, MacroFault> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let evaluated = match arg {
            Expr::Literal(text) => MacroArg::Text(text.clone()),
            Expr::VariableReference(name) => MacroArg::Variable { name: name.clone(), value: vars.get(name).cloned() },
            Expr::MacroCall { name, args } => {
                let inner = macro_args(args, ngrams, vars, macros)?;
                MacroArg::Output(macros.invoke(name, ngrams, vars, &inner)?)
            }
            // The parser only admits the three forms above as arguments.
            other => MacroArg::Text(other.to_string()),
        };
        out.push(evaluated);
    }
    Ok(out)
}

/// Invoke a macro call node, arguments included.
fn call_macro(
    name: &str,
    args: &[Expr],
    ngrams: &NgramContext,
    vars: &mut Bindings,
    macros: &MacroRegistry,
) -> Result<crate::macro_registry::MacroOutput, MacroFault> {
    let args = macro_args(args, ngrams, vars, macros)?;
    macros.invoke(name, ngrams, vars, &args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers_keep_source_and_share_cached_trees() {
        let cache = ParseCache::new();
        let a = MatchingExpr::parse_cached("[hi, there]", &cache).unwrap();
        let b = MatchingExpr::parse_cached("[hi, there]", &cache).unwrap();
        assert_eq!(a.source(), "[hi, there]");
        assert_eq!(a.to_string(), "[hi, there]");
        assert_eq!(a.tree(), b.tree());
        assert_eq!(cache.len(), 1);

        assert!(GenerationExpr::parse("[a, b]").is_err());
        assert!(GenerationExpr::parse("hi, there!").is_ok());
    }

    #[test]
    fn nested_macro_arguments_are_evaluated_first() {
        let macros = MacroRegistry::with_builtins();
        let ngrams = NgramContext::empty();
        let mut vars = crate::bindings! { "a" => "1" };
        let tree = parse("#NOT(#EQ($a, 2))", Grammar::Matching).unwrap();
        let Expr::MacroCall { name, args } = tree else { panic!("expected macro call") };
        let out = call_macro(&name, &args, &ngrams, &mut vars, &macros).unwrap();
        assert!(matches!(out, crate::macro_registry::MacroOutput::Flag(true)));
    }
}
