//! Expression tree shared by both grammars.
//!
//! A source string such as `[!{hi, hello}, $name=/\w+/]` parses into a tree of
//! [`Expr`] nodes. The same tree type serves the matching grammar (compiled to
//! a regex by `nlu.rs`) and the generation grammar (reduced to text by
//! `nlg.rs`); which node kinds are legal depends on the [`Grammar`]:
//!
//! ```text
//!                      NLU   NLG
//! Literal               x     x
//! FlexibleSequence      x
//! RigidSequence         x     x
//! Conjunction           x
//! Disjunction           x     x
//! Optional/Star/Plus    x
//! Negation              x
//! RawPattern            x
//! VariableReference     x     x
//! VariableAssignment    x     x
//! MacroCall             x     x
//! ```
//!
//! Trees are immutable once built and are shared behind `Arc` by the parse
//! cache, so one tree serves every compilation of the same source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two grammars a source string is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    /// User-input interpretation (NLU).
    Matching,
    /// System-output production (NLG).
    Generation,
}

impl Grammar {
    /// Node kinds a tree in this grammar may contain.
    pub fn allowed(self) -> NodeKinds {
        match self {
            Grammar::Matching => NodeKinds::all(),
            Grammar::Generation => {
                NodeKinds::LITERAL
                    | NodeKinds::RIGID_SEQUENCE
                    | NodeKinds::DISJUNCTION
                    | NodeKinds::VARIABLE_REFERENCE
                    | NodeKinds::VARIABLE_ASSIGNMENT
                    | NodeKinds::MACRO_CALL
            }
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grammar::Matching => f.write_str("matching"),
            Grammar::Generation => f.write_str("generation"),
        }
    }
}

bitflags::bitflags! {
    /// Set of expression node kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeKinds: u16 {
        const LITERAL             = 1 << 0;
        const FLEXIBLE_SEQUENCE   = 1 << 1;
        const RIGID_SEQUENCE      = 1 << 2;
        const CONJUNCTION         = 1 << 3;
        const DISJUNCTION         = 1 << 4;
        const OPTIONAL            = 1 << 5;
        const KLEENE_STAR         = 1 << 6;
        const KLEENE_PLUS         = 1 << 7;
        const NEGATION            = 1 << 8;
        const RAW_PATTERN         = 1 << 9;
        const VARIABLE_REFERENCE  = 1 << 10;
        const VARIABLE_ASSIGNMENT = 1 << 11;
        const MACRO_CALL          = 1 << 12;
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    FlexibleSequence(Vec<Expr>),
    RigidSequence(Vec<Expr>),
    Conjunction(Vec<Expr>),
    Disjunction(Vec<Expr>),
    Optional(Box<Expr>),
    KleeneStar(Box<Expr>),
    KleenePlus(Box<Expr>),
    Negation(Box<Expr>),
    RawPattern(String),
    VariableReference(String),
    VariableAssignment { name: String, value: Box<Expr> },
    MacroCall { name: String, args: Vec<Expr> },
}

impl Expr {
    /// The single-bit kind of this node.
    pub fn kind(&self) -> NodeKinds {
        match self {
            Expr::Literal(_) => NodeKinds::LITERAL,
            Expr::FlexibleSequence(_) => NodeKinds::FLEXIBLE_SEQUENCE,
            Expr::RigidSequence(_) => NodeKinds::RIGID_SEQUENCE,
            Expr::Conjunction(_) => NodeKinds::CONJUNCTION,
            Expr::Disjunction(_) => NodeKinds::DISJUNCTION,
            Expr::Optional(_) => NodeKinds::OPTIONAL,
            Expr::KleeneStar(_) => NodeKinds::KLEENE_STAR,
            Expr::KleenePlus(_) => NodeKinds::KLEENE_PLUS,
            Expr::Negation(_) => NodeKinds::NEGATION,
            Expr::RawPattern(_) => NodeKinds::RAW_PATTERN,
            Expr::VariableReference(_) => NodeKinds::VARIABLE_REFERENCE,
            Expr::VariableAssignment { .. } => NodeKinds::VARIABLE_ASSIGNMENT,
            Expr::MacroCall { .. } => NodeKinds::MACRO_CALL,
        }
    }

    /// Human-readable kind name, used in syntax errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::FlexibleSequence(_) => "flexible sequence",
            Expr::RigidSequence(_) => "rigid sequence",
            Expr::Conjunction(_) => "conjunction",
            Expr::Disjunction(_) => "disjunction",
            Expr::Optional(_) => "optional",
            Expr::KleeneStar(_) => "kleene star",
            Expr::KleenePlus(_) => "kleene plus",
            Expr::Negation(_) => "negation",
            Expr::RawPattern(_) => "raw pattern",
            Expr::VariableReference(_) => "variable reference",
            Expr::VariableAssignment { .. } => "variable assignment",
            Expr::MacroCall { .. } => "macro call",
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::FlexibleSequence(items)
            | Expr::RigidSequence(items)
            | Expr::Conjunction(items)
            | Expr::Disjunction(items) => items.iter().collect(),
            Expr::Optional(inner) | Expr::KleeneStar(inner) | Expr::KleenePlus(inner) | Expr::Negation(inner) => {
                vec![inner.as_ref()]
            }
            Expr::VariableAssignment { value, .. } => vec![value.as_ref()],
            Expr::MacroCall { args, .. } => args.iter().collect(),
            Expr::Literal(_) | Expr::RawPattern(_) | Expr::VariableReference(_) => Vec::new(),
        }
    }

    /// Union of the kinds of every node in this subtree.
    pub fn kinds(&self) -> NodeKinds {
        self.children().into_iter().fold(self.kind(), |acc, child| acc | child.kinds())
    }

    /// First node (pre-order) whose kind is not in `allowed`.
    pub fn first_disallowed(&self, allowed: NodeKinds) -> Option<&Expr> {
        if !allowed.contains(self.kind()) {
            return Some(self);
        }
        self.children().into_iter().find_map(|child| child.first_disallowed(allowed))
    }

    /// Names of variables read or written anywhere in this subtree.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::VariableReference(name) => out.push(name),
            Expr::VariableAssignment { name, .. } => out.push(name),
            _ => {}
        }
        for child in self.children() {
            child.collect_variables(out);
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, open: &str, items: &[Expr], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

/// Renders an equivalent source form.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(text) => {
                let plain = !text.is_empty()
                    && text.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '\'' || c == '.');
                if plain { f.write_str(text) } else { write!(f, "`{text}`") }
            }
            Expr::FlexibleSequence(items) => write_list(f, "[", items, "]"),
            Expr::RigidSequence(items) => write_list(f, "[!", items, "]"),
            Expr::Conjunction(items) => write_list(f, "<", items, ">"),
            Expr::Disjunction(items) => write_list(f, "{", items, "}"),
            Expr::Optional(inner) => write!(f, "{inner}?"),
            Expr::KleeneStar(inner) => write!(f, "{inner}*"),
            Expr::KleenePlus(inner) => write!(f, "{inner}+"),
            Expr::Negation(inner) => write!(f, "-{inner}"),
            Expr::RawPattern(raw) => write!(f, "/{}/", raw.replace('/', "\\/")),
            Expr::VariableReference(name) => write!(f, "${name}"),
            Expr::VariableAssignment { name, value } => write!(f, "${name}={value}"),
            Expr::MacroCall { name, args } if args.is_empty() => write!(f, "#{name}"),
            Expr::MacroCall { name, args } => {
                write!(f, "#{name}")?;
                write_list(f, "(", args, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Expr {
        Expr::Literal(s.to_string())
    }

    #[test]
    fn generation_grammar_rejects_matching_only_kinds() {
        let allowed = Grammar::Generation.allowed();
        let tree = Expr::RigidSequence(vec![lit("hi"), Expr::Optional(Box::new(lit("there")))]);

        let bad = tree.first_disallowed(allowed).unwrap();
        assert_eq!(bad.kind_name(), "optional");
        assert!(tree.first_disallowed(Grammar::Matching.allowed()).is_none());
    }

    #[test]
    fn kinds_and_variables_cover_the_whole_subtree() {
        let tree = Expr::Disjunction(vec![
            Expr::VariableAssignment { name: "x".into(), value: Box::new(lit("a")) },
            Expr::MacroCall { name: "EQ".into(), args: vec![Expr::VariableReference("y".into()), lit("b")] },
        ]);

        let kinds = tree.kinds();
        assert!(kinds.contains(NodeKinds::DISJUNCTION | NodeKinds::MACRO_CALL | NodeKinds::LITERAL));
        assert!(!kinds.contains(NodeKinds::NEGATION));
        assert_eq!(tree.variables(), vec!["x", "y"]);
    }

    #[test]
    fn display_renders_source_form() {
        let tree = Expr::RigidSequence(vec![
            Expr::Disjunction(vec![lit("hi"), lit("hello")]),
            Expr::Negation(Box::new(lit("bad"))),
            Expr::RawPattern("a/b".into()),
            Expr::MacroCall { name: "SET".into(), args: vec![Expr::VariableReference("x".into()), lit("1")] },
        ]);
        assert_eq!(tree.to_string(), r"[!{hi, hello}, -bad, /a\/b/, #SET($x, 1)]");
        assert_eq!(lit("a, b").to_string(), "`a, b`");
    }
}
