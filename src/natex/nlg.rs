//! Generation compiler: expression tree → output text.
//!
//! Reduction is eager and post-order. Each node reduces to `Some(text)` or
//! `None`; a `None` anywhere outside a disjunction makes the whole generation
//! fail. Disjunctions reduce every alternative on a scratch copy of the state
//! and then pick uniformly among the ones that succeeded, so an alternative
//! that needs an unbound variable is simply never chosen:
//!
//! ```text
//! {hi $name, hello there}   name unbound  => "hello there"
//!                           name = "ann"  => "hi ann" | "hello there"
//! ```
//!
//! Macro faults do not abort reduction; they leave a marker in the text and
//! the finished output is rejected if any marker survived.

use super::Expr;
use crate::Bindings;
use crate::error::MacroFault;
use crate::macro_registry::{MacroOutput, MacroRegistry};
use crate::ngrams::NgramContext;
use crate::selector;
use rand::RngCore;

const FAULT_MARKER: &str = "<<macro-fault>>";

/// A successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    /// Input bindings plus assignments and macro side effects.
    pub vars: Bindings,
}

pub(super) fn generate<R>(tree: &Expr, vars: &Bindings, macros: &MacroRegistry, rng: &mut R) -> Option<Generated>
where
    R: RngCore + ?Sized,
{
    let ngrams = NgramContext::empty();
    let mut reducer = Reducer { ngrams: &ngrams, macros, rng, vars: vars.clone() };
    let raw = reducer.reduce(tree)?;
    if raw.contains(FAULT_MARKER) {
        tracing::debug!(target: "parlance::natex", expr = %tree, "generation incomplete after macro fault");
        return None;
    }
    Some(Generated { text: tidy(&raw), vars: reducer.vars })
}

/// Collapse whitespace and drop spaces before closing punctuation.
fn tidy(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    regex!(r" ([,.!?;:])").replace_all(&collapsed, "$1").into_owned()
}

struct Reducer<'a, R: RngCore + ?Sized> {
    ngrams: &'a NgramContext,
    macros: &'a MacroRegistry,
    rng: &'a mut R,
    /// Working bindings; assignments land here so later references see them.
    vars: Bindings,
}

impl<R: RngCore + ?Sized> Reducer<'_, R> {
    fn reduce(&mut self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Literal(text) => Some(text.clone()),
            Expr::RigidSequence(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.reduce(item)?);
                }
                Some(parts.join(" "))
            }
            Expr::Disjunction(items) => self.disjunction(items),
            Expr::VariableReference(name) => {
                let value = self.vars.get(name).cloned();
                if value.is_none() {
                    tracing::trace!(target: "parlance::natex", variable = name.as_str(), "unresolved reference");
                }
                value
            }
            Expr::VariableAssignment { name, value } => {
                let text = self.reduce(value)?;
                let text = tidy(&text);
                self.vars.insert(name.clone(), text.clone());
                Some(text)
            }
            Expr::MacroCall { name, args } => self.macro_call(name, args),
            // Rejected by the parser for this grammar.
            other => {
                tracing::debug!(target: "parlance::natex", kind = other.kind_name(), "node kind cannot be generated");
                None
            }
        }
    }

    fn disjunction(&mut self, items: &[Expr]) -> Option<String> {
        let mut reduced = Vec::with_capacity(items.len());
        for item in items {
            let saved = self.vars.clone();
            if let Some(text) = self.reduce(item) {
                reduced.push((text, std::mem::replace(&mut self.vars, saved)));
            } else {
                self.vars = saved;
            }
        }
        let (text, vars) = selector::choose_uniform(&reduced, &mut *self.rng)?.clone();
        self.vars = vars;
        Some(text)
    }

    fn macro_call(&mut self, name: &str, args: &[Expr]) -> Option<String> {
        match super::call_macro(name, args, self.ngrams, &mut self.vars, self.macros) {
            Ok(MacroOutput::Text(text)) => Some(text),
            Ok(MacroOutput::Choices(choices)) => {
                let choices: Vec<String> = choices.into_iter().collect();
                selector::choose_uniform(&choices, &mut *self.rng).cloned()
            }
            Ok(MacroOutput::Flag(true)) => Some(String::new()),
            Ok(MacroOutput::Flag(false)) => None,
            Ok(MacroOutput::Opaque(_)) => Some(fault(MacroFault::OpaqueOutput { name: name.to_string() })),
            Err(err) => Some(fault(err)),
        }
    }
}

fn fault(err: MacroFault) -> String {
    tracing::warn!(target: "parlance::natex", error = %err, "macro fault in generation expression");
    FAULT_MARKER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MacroError;
    use crate::macro_registry::MacroArg;
    use crate::natex::{Grammar, parse};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::rngs::mock::StepRng;
    use std::any::Any;
    use std::sync::Arc;

    fn run(source: &str, vars: &Bindings, macros: &MacroRegistry, rng: &mut dyn RngCore) -> Option<Generated> {
        let tree = parse(source, Grammar::Generation).unwrap();
        generate(&tree, vars, macros, rng)
    }

    fn text(source: &str, vars: &Bindings) -> Option<String> {
        run(source, vars, &MacroRegistry::with_builtins(), &mut StepRng::new(0, 0)).map(|g| g.text)
    }

    #[test]
    fn literals_and_punctuation_are_tidied() {
        let vars = crate::bindings! { "name" => "Ann" };
        assert_eq!(text("Hello $name, how are you?", &vars).as_deref(), Some("Hello Ann, how are you?"));
        assert_eq!(text("Hi   $name !", &vars).as_deref(), Some("Hi Ann!"));
        assert_eq!(text("", &vars).as_deref(), Some(""));
    }

    #[test]
    fn unresolved_variable_fails_until_bound() {
        let mut vars = Bindings::new();
        assert_eq!(text("nice to meet you $name", &vars), None);
        vars.insert("name".into(), "Bo".into());
        assert_eq!(text("nice to meet you $name", &vars).as_deref(), Some("nice to meet you Bo"));
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let src = "{hi, hello, hey there, good day} {friend, pal, buddy}";
        let vars = Bindings::new();
        let macros = MacroRegistry::new();
        let outputs = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10).map(|_| run(src, &vars, &macros, &mut rng).unwrap().text).collect::<Vec<_>>()
        };
        assert_eq!(outputs(7), outputs(7));

        let mut a = StepRng::new(3, 17);
        let mut b = StepRng::new(3, 17);
        assert_eq!(run(src, &vars, &macros, &mut a), run(src, &vars, &macros, &mut b));
    }

    #[test]
    fn disjunction_skips_failing_alternatives() {
        let vars = Bindings::new();
        let macros = MacroRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let out = run("{hi $name, hello there}", &vars, &macros, &mut rng).unwrap();
            assert_eq!(out.text, "hello there");
        }
        assert!(run("{$a, $b}", &vars, &macros, &mut rng).is_none());
    }

    #[test]
    fn unchosen_branches_leave_no_side_effects() {
        let vars = Bindings::new();
        let macros = MacroRegistry::new();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let out = run("{$x=a, $y=b}", &vars, &macros, &mut rng).unwrap();
            assert_eq!(out.vars.len(), 1);
            let (name, value) = out.vars.iter().next().unwrap();
            assert_eq!(out.text, *value);
            assert!(name == "x" || name == "y");
        }
    }

    #[test]
    fn assignment_is_visible_to_later_references() {
        let out = run("$g={hello} and $g again", &Bindings::new(), &MacroRegistry::new(), &mut StepRng::new(0, 0))
            .unwrap();
        assert_eq!(out.text, "hello and hello again");
        assert_eq!(out.vars.get("g").map(String::as_str), Some("hello"));
    }

    #[test]
    fn macro_outputs_reduce_to_text() {
        let mut macros = MacroRegistry::with_builtins();
        macros.register("PICK", |_: &NgramContext, _: &mut Bindings, _: &[MacroArg]| -> Result<MacroOutput, MacroError> {
            Ok(MacroOutput::choices(["tea"]))
        });
        macros.register("BROKEN", |_: &NgramContext, _: &mut Bindings, _: &[MacroArg]| -> Result<MacroOutput, MacroError> {
            Err(MacroError::new("backend down"))
        });
        macros.register("HANDLE", |_: &NgramContext, _: &mut Bindings, _: &[MacroArg]| -> Result<MacroOutput, MacroError> {
            Ok(MacroOutput::Opaque(Arc::new(42_u32) as Arc<dyn Any + Send + Sync>))
        });
        let vars = Bindings::new();
        let mut rng = StepRng::new(0, 0);

        assert_eq!(run("some #PICK?", &vars, &macros, &mut rng).unwrap().text, "some tea?");
        let set = run("ok #SET($drink, tea)", &vars, &macros, &mut rng).unwrap();
        assert_eq!(set.text, "ok");
        assert_eq!(set.vars.get("drink").map(String::as_str), Some("tea"));
        assert!(run("#EQ($drink, tea) yes", &vars, &macros, &mut rng).is_none());

        assert!(run("status: #BROKEN", &vars, &macros, &mut rng).is_none());
        assert!(run("value #HANDLE", &vars, &macros, &mut rng).is_none());
        // A faulting alternative still "reduces", so the marker must be caught at the end.
        assert!(run("{#BROKEN}", &vars, &macros, &mut rng).is_none());
    }
}
