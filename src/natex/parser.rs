//! Recursive-descent parser for both expression grammars.
//!
//! The two grammars share one surface syntax; the active [`Grammar`] decides
//! which characters are structural:
//!
//! ```text
//! matching:    [ ] [! { } < > ( ) , $ # / ` ? * + and a leading -
//! generation:  [ ] [! { } ` and $name / #NAME; `,` only inside brackets,
//!              `)` only inside macro arguments; everything else is text
//! ```
//!
//! Juxtaposed terms (`my name is $n`) form a rigid sequence. After parsing,
//! the tree is checked against [`Grammar::allowed`] so that, for example, a
//! flexible sequence in a generation expression is rejected with a clear
//! message instead of silently producing odd text.

use super::expr::{Expr, Grammar};
use crate::error::GrammarSyntaxError;

type ParseResult<T> = Result<T, GrammarSyntaxError>;

/// Where a sequence of juxtaposed terms ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    List(char),
    Args,
}

/// Parse `source` in the given grammar.
pub fn parse(source: &str, grammar: Grammar) -> ParseResult<Expr> {
    let mut parser = Parser { src: source, pos: 0, grammar };
    let items = parser.sequence(Scope::Top)?;
    parser.skip_ws();
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected `{c}`")));
    }

    let tree = match items.len() {
        0 => Expr::RigidSequence(Vec::new()),
        1 => items.into_iter().next().unwrap_or(Expr::RigidSequence(Vec::new())),
        _ => Expr::RigidSequence(items),
    };

    if let Some(bad) = tree.first_disallowed(grammar.allowed()) {
        return Err(GrammarSyntaxError {
            grammar,
            source_text: source.to_string(),
            position: 0,
            message: format!("{} is not allowed in {} expressions", bad.kind_name(), grammar),
        });
    }
    Ok(tree)
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
    grammar: Grammar,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'s> Parser<'s> {
    fn error(&self, message: impl Into<String>) -> GrammarSyntaxError {
        GrammarSyntaxError {
            grammar: self.grammar,
            source_text: self.src.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn matching(&self) -> bool {
        self.grammar == Grammar::Matching
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn ends_sequence(&self, c: char, scope: Scope) -> bool {
        match scope {
            Scope::Top => false,
            Scope::List(close) => c == ',' || c == close,
            Scope::Args => c == ',' || c == ')',
        }
    }

    /// Juxtaposed terms up to (not including) the scope's terminator.
    fn sequence(&mut self, scope: Scope) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(c) if self.ends_sequence(c, scope) => break,
                Some(_) => items.push(self.term(scope)?),
            }
        }
        Ok(items)
    }

    /// Comma-separated items after an opening bracket, through `close`.
    fn list(&mut self, close: char) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            let seq = self.sequence(Scope::List(close))?;
            if seq.is_empty() {
                return Err(self.error("empty item in list"));
            }
            items.push(combine(seq));
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(items),
                _ => return Err(self.error(format!("unterminated list, expected `{close}`"))),
            }
        }
    }

    fn term(&mut self, scope: Scope) -> ParseResult<Expr> {
        let base = self.atom(scope)?;
        Ok(if self.matching() { self.postfix(base) } else { base })
    }

    fn postfix(&mut self, mut expr: Expr) -> Expr {
        loop {
            expr = match self.peek() {
                Some('?') => Expr::Optional(Box::new(expr)),
                Some('*') => Expr::KleeneStar(Box::new(expr)),
                Some('+') => Expr::KleenePlus(Box::new(expr)),
                _ => return expr,
            };
            self.bump();
        }
    }

    fn atom(&mut self, scope: Scope) -> ParseResult<Expr> {
        let Some(c) = self.peek() else {
            return Err(self.error("unexpected end of expression"));
        };
        match c {
            '[' => {
                self.bump();
                if self.eat('!') {
                    Ok(Expr::RigidSequence(self.list(']')?))
                } else {
                    Ok(Expr::FlexibleSequence(self.list(']')?))
                }
            }
            '{' => {
                self.bump();
                Ok(Expr::Disjunction(self.list('}')?))
            }
            '<' if self.matching() => {
                self.bump();
                Ok(Expr::Conjunction(self.list('>')?))
            }
            '-' if self.matching() => {
                self.bump();
                self.skip_ws();
                Ok(Expr::Negation(Box::new(self.term(scope)?)))
            }
            '/' if self.matching() => self.raw_pattern(),
            '`' => self.quoted(),
            '$' if self.peek_second().is_some_and(is_ident_start) => {
                self.bump();
                let name = self.ident();
                if self.eat('=') {
                    self.skip_ws();
                    let value = self.term(scope)?;
                    Ok(Expr::VariableAssignment { name, value: Box::new(value) })
                } else {
                    Ok(Expr::VariableReference(name))
                }
            }
            '#' if self.peek_second().is_some_and(is_ident_start) => self.macro_call(),
            '$' | '#' if self.matching() => Err(self.error(format!("`{c}` must be followed by a name"))),
            ']' | '}' | '>' | ')' | ',' if self.matching() => Err(self.error(format!("unexpected `{c}`"))),
            ']' | '}' => Err(self.error(format!("unexpected `{c}`"))),
            _ => self.bare_literal(scope),
        }
    }

    fn stops_literal(&self, c: char, prev: Option<char>, scope: Scope) -> bool {
        if self.ends_sequence(c, scope) {
            return true;
        }
        let next_is_name = self.peek_second().is_some_and(is_ident_start);
        match c {
            '[' | ']' | '{' | '}' | '`' => true,
            '$' | '#' => self.matching() || next_is_name,
            '<' | '>' | '(' | ')' | ',' | '/' | '?' | '*' | '+' => self.matching(),
            '-' => self.matching() && prev.is_some_and(char::is_whitespace),
            _ => false,
        }
    }

    fn bare_literal(&mut self, scope: Scope) -> ParseResult<Expr> {
        let start = self.pos;
        let mut prev = None;
        while let Some(c) = self.peek() {
            if self.stops_literal(c, prev, scope) {
                break;
            }
            prev = Some(c);
            self.bump();
        }
        let text = self.src[start..self.pos].split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return Err(self.error("expected a term"));
        }
        Ok(Expr::Literal(text))
    }

    fn quoted(&mut self) -> ParseResult<Expr> {
        self.bump();
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == '`' {
                let text = &self.src[start..self.pos - 1];
                return Ok(Expr::Literal(text.to_string()));
            }
        }
        Err(self.error("unterminated quoted literal"))
    }

    fn raw_pattern(&mut self) -> ParseResult<Expr> {
        let open = self.pos;
        self.bump();
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = open;
                    return Err(self.error("unterminated raw pattern"));
                }
                Some('/') => break,
                Some('\\') if self.peek() == Some('/') => {
                    self.bump();
                    raw.push('/');
                }
                Some('\\') => {
                    raw.push('\\');
                    if let Some(escaped) = self.bump() {
                        raw.push(escaped);
                    }
                }
                Some(c) => raw.push(c),
            }
        }
        if let Err(err) = fancy_regex::Regex::new(&raw) {
            self.pos = open;
            return Err(self.error(format!("invalid raw pattern: {err}")));
        }
        Ok(Expr::RawPattern(raw))
    }

    fn macro_call(&mut self) -> ParseResult<Expr> {
        self.bump();
        let name = self.ident();
        let mut args = Vec::new();
        if !self.eat('(') {
            return Ok(Expr::MacroCall { name, args });
        }
        self.skip_ws();
        if self.eat(')') {
            return Ok(Expr::MacroCall { name, args });
        }
        loop {
            let seq = self.sequence(Scope::Args)?;
            let arg = match seq.len() {
                0 => return Err(self.error(format!("empty argument to #{name}"))),
                1 => combine(seq),
                _ => return Err(self.error(format!("argument to #{name} must be a single term"))),
            };
            if !matches!(arg, Expr::Literal(_) | Expr::VariableReference(_) | Expr::MacroCall { .. }) {
                return Err(self.error(format!(
                    "argument to #{name} must be a literal, a variable reference or a macro call, found {}",
                    arg.kind_name()
                )));
            }
            args.push(arg);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(Expr::MacroCall { name, args }),
                _ => return Err(self.error(format!("unterminated argument list for #{name}"))),
            }
        }
    }
}

fn combine(mut items: Vec<Expr>) -> Expr {
    if items.len() == 1 { items.remove(0) } else { Expr::RigidSequence(items) }
}
