//! Matching compiler: expression tree → backtracking regex.
//!
//! Compilation is a post-order walk producing one regex fragment per node.
//! Bindings are read *at compile time*, so the same tree yields different
//! patterns as the session evolves:
//!
//! ```text
//! [!{hi, hello}, $name=/\w+/]   with no bindings
//!   => (?is)^\W*(?:(?:\bhi\b|\bhello\b)\W*(?P<g0>(?:\w+)))\W*_END_$
//!      groups: g0 -> name
//!
//! [!hello, $name]               with name = "ann"
//!   => (?is)^\W*(?:\bhello\b\W*\bann\b)\W*_END_$
//! ```
//!
//! Capture groups are numbered (`g0`, `g1`, ...) and mapped back to variable
//! names, so assigning the same variable twice never produces a duplicate
//! group name. A later `$name` reference in the same expression compiles to a
//! backreference to the most recent group for `name`.
//!
//! The utterance is matched as `"<normalized text> _END_"`, which lets
//! patterns anchor on the end of input without fighting trailing punctuation.

use super::Expr;
use crate::Bindings;
use crate::error::MacroFault;
use crate::macro_registry::{MacroOutput, MacroRegistry};
use crate::ngrams::NgramContext;
use fancy_regex::{Regex, RegexBuilder};
use std::collections::HashMap;

const END_MARKER: &str = "_END_";
/// A fragment that can never match.
const UNMATCHABLE: &str = "(?!x)x";
/// Lazy filler between flexible items.
const FILLER: &str = ".*?";
/// Optional punctuation between rigid items.
const CONNECTIVE: &str = r"\W*";

/// A compiled matching expression, ready to run against one utterance.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: String,
    /// `(group name, variable name)` in opening order.
    groups: Vec<(String, String)>,
    /// Bindings after compile-time macro side effects.
    vars: Bindings,
}

impl CompiledPattern {
    /// Full regex source, flags and anchors included.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Run against `ngrams`; on success, the compile-time bindings plus every
    /// participating capture.
    pub fn matches(&self, ngrams: &NgramContext, backtrack_limit: usize) -> Option<Bindings> {
        let regex = match RegexBuilder::new(&self.pattern).backtrack_limit(backtrack_limit).build() {
            Ok(regex) => regex,
            Err(err) => {
                tracing::warn!(target: "parlance::natex", pattern = %self.pattern, error = %err, "pattern failed to build");
                return None;
            }
        };
        self.run(&regex, ngrams)
    }

    fn run(&self, regex: &Regex, ngrams: &NgramContext) -> Option<Bindings> {
        let subject =
            if ngrams.text().is_empty() { END_MARKER.to_string() } else { format!("{} {END_MARKER}", ngrams.text()) };

        let caps = match regex.captures(&subject) {
            Ok(Some(caps)) => caps,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(
                    target: "parlance::natex",
                    pattern = %self.pattern,
                    utterance = ngrams.text(),
                    error = %err,
                    "match aborted, treating as no match"
                );
                return None;
            }
        };

        let mut vars = self.vars.clone();
        for (group, var) in &self.groups {
            if let Some(m) = caps.name(group) {
                vars.insert(var.clone(), m.as_str().trim().to_string());
            }
        }
        Some(vars)
    }
}

/// Compile `tree` against the current bindings.
///
/// Macros run during compilation; their side effects on the bindings are kept
/// in the returned pattern and only surface if the pattern matches.
pub(super) fn compile(tree: &Expr, ngrams: &NgramContext, vars: &Bindings, macros: &MacroRegistry) -> CompiledPattern {
    let mut compiler = Compiler { ngrams, macros, vars: vars.clone(), opened: HashMap::new(), groups: Vec::new() };
    let root = compiler.fragment(tree);
    let pattern = format!(r"(?is)^\W*(?:{root})\W*{END_MARKER}$");
    tracing::trace!(target: "parlance::natex", expr = %tree, %pattern, "compiled");
    CompiledPattern { pattern, groups: compiler.groups, vars: compiler.vars }
}

struct Compiler<'a> {
    ngrams: &'a NgramContext,
    macros: &'a MacroRegistry,
    vars: Bindings,
    /// Variable name → most recent group capturing it.
    opened: HashMap<String, String>,
    groups: Vec<(String, String)>,
}

impl Compiler<'_> {
    fn fragment(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(text) => literal(text),
            Expr::FlexibleSequence(items) => {
                let parts: Vec<String> = items.iter().map(|item| self.fragment(item)).collect();
                if parts.is_empty() {
                    return FILLER.to_string();
                }
                format!("{FILLER}{}{FILLER}", parts.join(FILLER))
            }
            Expr::RigidSequence(items) => {
                let parts: Vec<String> = items.iter().map(|item| self.fragment(item)).collect();
                parts.join(CONNECTIVE)
            }
            Expr::Conjunction(items) => {
                let lookaheads: String =
                    items.iter().map(|item| format!("(?={FILLER}{})", self.fragment(item))).collect();
                format!("{lookaheads}{FILLER}")
            }
            Expr::Disjunction(items) => {
                if items.is_empty() {
                    return UNMATCHABLE.to_string();
                }
                let alternatives: Vec<String> = items.iter().map(|item| self.fragment(item)).collect();
                format!("(?:{})", alternatives.join("|"))
            }
            Expr::Optional(inner) => format!("(?:{})?", self.fragment(inner)),
            Expr::KleeneStar(inner) => format!("(?:{})?", self.repeated(inner)),
            Expr::KleenePlus(inner) => format!("(?:{})", self.repeated(inner)),
            Expr::Negation(inner) => format!("(?!{FILLER}{}){FILLER}", self.fragment(inner)),
            Expr::RawPattern(raw) => format!("(?:{raw})"),
            Expr::VariableReference(name) => self.reference(name),
            Expr::VariableAssignment { name, value } => {
                let inner = self.fragment(value);
                let group = format!("g{}", self.groups.len());
                self.opened.insert(name.clone(), group.clone());
                self.groups.push((group.clone(), name.clone()));
                format!("(?P<{group}>{inner})")
            }
            Expr::MacroCall { name, args } => self.macro_call(name, args),
        }
    }

    /// One occurrence, then separator-prefixed repetitions.
    ///
    /// The body is emitted twice unless it opened capture groups, in which
    /// case a single separator-prefixed loop keeps group names unique.
    fn repeated(&mut self, inner: &Expr) -> String {
        let before = self.groups.len();
        let body = self.fragment(inner);
        if self.groups.len() == before {
            format!("{body}(?:{CONNECTIVE}{body})*")
        } else {
            format!("(?:{CONNECTIVE}{body})+")
        }
    }

    fn reference(&self, name: &str) -> String {
        if let Some(group) = self.opened.get(name) {
            return format!(r"\k<{group}>");
        }
        match self.vars.get(name) {
            Some(value) => literal(value),
            None => {
                tracing::trace!(target: "parlance::natex", variable = name, "unresolved reference");
                UNMATCHABLE.to_string()
            }
        }
    }

    fn macro_call(&mut self, name: &str, args: &[Expr]) -> String {
        let output = super::call_macro(name, args, self.ngrams, &mut self.vars, self.macros);
        match output {
            Ok(MacroOutput::Text(text)) => literal(&text),
            Ok(MacroOutput::Choices(choices)) if choices.is_empty() => UNMATCHABLE.to_string(),
            Ok(MacroOutput::Choices(choices)) => {
                let alternatives: Vec<String> = choices.iter().map(|choice| literal(choice)).collect();
                format!("(?:{})", alternatives.join("|"))
            }
            Ok(MacroOutput::Flag(true)) => FILLER.to_string(),
            Ok(MacroOutput::Flag(false)) => UNMATCHABLE.to_string(),
            Ok(MacroOutput::Opaque(_)) => fault(MacroFault::OpaqueOutput { name: name.to_string() }),
            Err(err) => fault(err),
        }
    }
}

fn fault(err: MacroFault) -> String {
    tracing::warn!(target: "parlance::natex", error = %err, "macro fault in matching expression");
    UNMATCHABLE.to_string()
}

/// Characters with meaning in a regex outside character classes.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Escaped literal, whitespace-tolerant, guarded by `\b` on word edges.
fn literal(text: &str) -> String {
    let words: Vec<String> = text.split_whitespace().map(escape).collect();
    if words.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    if text.trim_start().starts_with(is_word_char) {
        out.push_str(r"\b");
    }
    out.push_str(&words.join(r"\s+"));
    if text.trim_end().ends_with(is_word_char) {
        out.push_str(r"\b");
    }
    out
}
