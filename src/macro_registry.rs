//! Macro capability interface and registry.
//!
//! Both compilers call out to host logic through `#NAME(args)` terms. A macro
//! sees the utterance's [`NgramContext`], a mutable view of the bindings being
//! compiled against, and its already-evaluated arguments:
//!
//! ```text
//! #SET($mood, good)
//!   args[0] = Variable { name: "mood", value: <current value> }
//!   args[1] = Text("good")
//! ```
//!
//! Macros are resolved by name once per call; an unregistered name, an `Err`
//! return or a panic all become a [`MacroFault`] that the caller contains.

use crate::Bindings;
use crate::error::{MacroError, MacroFault};
use crate::ngrams::NgramContext;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Binding written by `#GATE`: comma-separated names of the gated variables.
pub const GATE_KEY: &str = "__gate__";
/// Binding written by `#TARGET`: the state a transition should redirect to.
pub const TARGET_KEY: &str = "__target__";

/// What a macro hands back to the compiler.
#[derive(Debug, Clone)]
pub enum MacroOutput {
    /// A literal piece of text.
    Text(String),
    /// A set of alternatives (alternation / random pick).
    Choices(BTreeSet<String>),
    /// Success or failure without text.
    Flag(bool),
    /// A host value for cooperating macros; never valid in compiled output.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl MacroOutput {
    pub fn choices<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MacroOutput::Choices(items.into_iter().map(Into::into).collect())
    }
}

/// An evaluated macro argument.
#[derive(Debug, Clone)]
pub enum MacroArg {
    /// A literal argument, e.g. `good` in `#SET($mood, good)`.
    Text(String),
    /// A `$name` argument and its value at call time.
    Variable { name: String, value: Option<String> },
    /// The result of a nested macro call.
    Output(MacroOutput),
}

impl MacroArg {
    /// Textual value: literal text, a bound variable's value, or nested text output.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MacroArg::Text(text) => Some(text),
            MacroArg::Variable { value, .. } => value.as_deref(),
            MacroArg::Output(MacroOutput::Text(text)) => Some(text),
            MacroArg::Output(_) => None,
        }
    }

    /// Name of the variable this argument denotes (`$x` or a bare `x`).
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            MacroArg::Variable { name, .. } => Some(name),
            MacroArg::Text(text) => Some(text),
            MacroArg::Output(_) => None,
        }
    }
}

/// A host capability callable from expressions.
pub trait Macro: Send + Sync {
    fn call(&self, ngrams: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError>;
}

impl<F> Macro for F
where
    F: Fn(&NgramContext, &mut Bindings, &[MacroArg]) -> Result<MacroOutput, MacroError> + Send + Sync,
{
    fn call(&self, ngrams: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        self(ngrams, vars, args)
    }
}

/// Name → macro table shared by every compilation of a flow.
#[derive(Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, Arc<dyn Macro>>,
}

impl fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroRegistry").field("macros", &self.names()).finish()
    }
}

impl MacroRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with `SET`, `EQ`, `EXISTS`, `NOT`, `GATE` and `TARGET`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("SET", SetVar)
            .register("EQ", Equals)
            .register("EXISTS", Exists)
            .register("NOT", Not)
            .register("GATE", Gate)
            .register("TARGET", Target);
        registry
    }

    /// Register (or replace) a macro under `name`.
    pub fn register(&mut self, name: impl Into<String>, m: impl Macro + 'static) -> &mut Self {
        self.macros.insert(name.into(), Arc::new(m));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call `name`, turning every failure mode into a [`MacroFault`].
    pub(crate) fn invoke(
        &self,
        name: &str,
        ngrams: &NgramContext,
        vars: &mut Bindings,
        args: &[MacroArg],
    ) -> Result<MacroOutput, MacroFault> {
        let Some(m) = self.macros.get(name) else {
            return Err(MacroFault::Unknown { name: name.to_string() });
        };
        match catch_unwind(AssertUnwindSafe(|| m.call(ngrams, vars, args))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(MacroFault::Failed { name: name.to_string(), reason: err.0 }),
            Err(_) => Err(MacroFault::Panicked { name: name.to_string() }),
        }
    }
}

// --- Built-in macros ---------------------------------------------------------

fn arity(name: &str, args: &[MacroArg], expected: usize) -> Result<(), MacroError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(MacroError::new(format!("#{name} takes {expected} argument(s), got {}", args.len())))
    }
}

/// `#SET($var, value)` binds `var`; always succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SetVar;

impl Macro for SetVar {
    fn call(&self, _: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        arity("SET", args, 2)?;
        let name = args[0].variable_name().ok_or_else(|| MacroError::new("#SET needs a variable name"))?;
        let value = args[1].as_text().ok_or_else(|| MacroError::new("#SET value has no text"))?;
        vars.insert(name.to_string(), value.to_string());
        Ok(MacroOutput::Flag(true))
    }
}

/// `#EQ(a, b)` succeeds when both arguments resolve to the same text.
#[derive(Debug, Clone, Copy)]
pub struct Equals;

impl Macro for Equals {
    fn call(&self, _: &NgramContext, _: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        arity("EQ", args, 2)?;
        let equal = matches!((args[0].as_text(), args[1].as_text()), (Some(a), Some(b)) if a == b);
        Ok(MacroOutput::Flag(equal))
    }
}

/// `#EXISTS($a, ...)` succeeds when every named variable is bound.
#[derive(Debug, Clone, Copy)]
pub struct Exists;

impl Macro for Exists {
    fn call(&self, _: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        let bound = args.iter().all(|arg| arg.variable_name().is_some_and(|name| vars.contains_key(name)));
        Ok(MacroOutput::Flag(bound))
    }
}

/// `#NOT(#M(..))` inverts a flag; `#NOT($x)` succeeds when `x` is unbound.
#[derive(Debug, Clone, Copy)]
pub struct Not;

impl Macro for Not {
    fn call(&self, _: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        arity("NOT", args, 1)?;
        match &args[0] {
            MacroArg::Output(MacroOutput::Flag(flag)) => Ok(MacroOutput::Flag(!flag)),
            MacroArg::Output(MacroOutput::Choices(set)) => Ok(MacroOutput::Flag(set.is_empty())),
            MacroArg::Output(_) => Err(MacroError::new("#NOT expects a flag")),
            MacroArg::Variable { name, .. } => Ok(MacroOutput::Flag(!vars.contains_key(name))),
            MacroArg::Text(text) => Ok(MacroOutput::Flag(text.is_empty())),
        }
    }
}

/// `#GATE(var, ...)` asks the turn engine to close this transition for the
/// current values of the listed variables once it fires.
#[derive(Debug, Clone, Copy)]
pub struct Gate;

impl Macro for Gate {
    fn call(&self, _: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        let names: Vec<&str> = args.iter().filter_map(MacroArg::variable_name).collect();
        if names.len() != args.len() {
            return Err(MacroError::new("#GATE arguments must be variable names"));
        }
        vars.insert(GATE_KEY.to_string(), names.join(","));
        Ok(MacroOutput::Flag(true))
    }
}

/// `#TARGET(state)` redirects the firing transition to another state.
#[derive(Debug, Clone, Copy)]
pub struct Target;

impl Macro for Target {
    fn call(&self, _: &NgramContext, vars: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        arity("TARGET", args, 1)?;
        let state = args[0].as_text().ok_or_else(|| MacroError::new("#TARGET needs a state name"))?;
        vars.insert(TARGET_KEY.to_string(), state.to_string());
        Ok(MacroOutput::Flag(true))
    }
}
