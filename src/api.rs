use crate::engine::TurnMetrics;
use crate::error::GrammarSyntaxError;
use crate::macro_registry::MacroRegistry;
use crate::natex::{GenerationExpr, MatchingExpr, ParseCache};
use crate::ngrams::{DEFAULT_NGRAM_MAX, NgramContext};
use crate::{Bindings, Speaker};
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Serialize};

static DEFAULT_MACROS: Lazy<MacroRegistry> = Lazy::new(MacroRegistry::with_builtins);
static SHARED_CACHE: Lazy<ParseCache> = Lazy::new(ParseCache::new);

/// Options that affect compilation and turn-taking.
///
/// Every field has a default, so a script may give any subset:
///
/// ```
/// let opts: parlance::Options = serde_json::from_str(r#"{ "seed": 7 }"#).unwrap();
/// assert_eq!(opts.max_rule_iterations, 256);
/// assert_eq!(opts.seed, Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Rule firings plus repeating-rule repeats allowed per user turn before
    /// the update rules are declared non-convergent.
    pub max_rule_iterations: usize,
    /// Backtracking budget for a single regex match.
    pub backtrack_limit: usize,
    /// Longest n-gram materialized per utterance.
    pub ngram_max: usize,
    /// Joins the outputs of a multi-hop system turn.
    pub output_separator: String,
    /// Seed for the session random source; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_rule_iterations: 256,
            backtrack_limit: 1_000_000,
            ngram_max: DEFAULT_NGRAM_MAX,
            output_separator: " ".to_string(),
            seed: None,
        }
    }
}

/// Why a candidate transition was or was not viable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Viable,
    /// The matching expression did not match the utterance.
    NoMatch,
    /// The generation expression could not be completed.
    Unresolved,
    /// The target's enter guard failed.
    EnterGuard,
    /// The gate for this target and variable configuration is closed.
    Gated,
    /// A `#TARGET` redirect named a state that does not exist.
    UnknownTarget(String),
}

/// One candidate considered during a step.
#[derive(Debug, Clone)]
pub struct CandidateTrace {
    /// Expression source, or the rule's precondition for update-rule candidates.
    pub source: String,
    pub target: String,
    pub score: f64,
    pub outcome: CandidateOutcome,
}

/// What a step ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// A graph transition was taken.
    Transition,
    /// The pending update-rule candidate was taken.
    UpdateRule,
    /// No user transition matched; moved to the state's error successor.
    ErrorSuccessor,
    /// No user transition matched but an update rule is pending; stayed put.
    Stay,
    /// No system transition was viable; moved to the fallback state.
    Fallback,
    /// No candidate on a later hop; the turn ended here.
    End,
}

/// Trace of a single engine step.
#[derive(Debug, Clone)]
pub struct StepTrace {
    pub step: usize,
    pub state: String,
    pub kind: StepKind,
    pub candidates: Vec<CandidateTrace>,
    /// Index into `candidates` of the one taken.
    pub chosen: Option<usize>,
    /// State after the step.
    pub target: String,
}

/// Result of [`Dialogue::system_turn_verbose`](crate::Dialogue::system_turn_verbose)
/// and [`Dialogue::user_turn_verbose`](crate::Dialogue::user_turn_verbose).
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub speaker: Speaker,
    /// The user utterance, for user turns.
    pub utterance: Option<String>,
    /// Concatenated system output (empty for user turns).
    pub output: String,
    pub start_state: String,
    pub end_state: String,
    /// Update rules that fired, in order (user turns only).
    pub rules_fired: Vec<String>,
    pub steps: Vec<StepTrace>,
    pub metrics: TurnMetrics,
}

/// Match `utterance` against a matching expression using the built-in macros.
///
/// # Example
/// ```
/// let vars = parlance::matches("[!my name is, $name=/\\w+/]", "My name is Ada", &Default::default())
///     .unwrap()
///     .unwrap();
/// assert_eq!(vars["name"], "ada");
/// ```
pub fn matches(source: &str, utterance: &str, vars: &Bindings) -> Result<Option<Bindings>, GrammarSyntaxError> {
    matches_with(source, utterance, vars, &DEFAULT_MACROS, &Options::default())
}

/// Like [`matches`], with caller-supplied macros and options.
pub fn matches_with(
    source: &str,
    utterance: &str,
    vars: &Bindings,
    macros: &MacroRegistry,
    options: &Options,
) -> Result<Option<Bindings>, GrammarSyntaxError> {
    let expr = MatchingExpr::parse_cached(source, &SHARED_CACHE)?;
    let ngrams = NgramContext::with_max_n(utterance, options.ngram_max);
    Ok(expr.matches(&ngrams, vars, macros, options))
}

/// Reduce a generation expression to text using the built-in macros and a
/// thread-local random source.
pub fn generate(source: &str, vars: &Bindings) -> Result<Option<String>, GrammarSyntaxError> {
    generate_with(source, vars, &DEFAULT_MACROS, &mut rand::thread_rng())
}

/// Like [`generate`], with caller-supplied macros and random source.
pub fn generate_with<R>(
    source: &str,
    vars: &Bindings,
    macros: &MacroRegistry,
    rng: &mut R,
) -> Result<Option<String>, GrammarSyntaxError>
where
    R: RngCore + ?Sized,
{
    let expr = GenerationExpr::parse_cached(source, &SHARED_CACHE)?;
    Ok(expr.generate(vars, macros, rng).map(|generated| generated.text))
}
