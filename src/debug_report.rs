use parlance::{CandidateOutcome, CandidateTrace, StepKind, StepTrace, TurnReport};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

pub fn print_turn(report: &TurnReport, color: bool) {
    let palette = ansi::Palette::new(color);
    let heading = match &report.utterance {
        Some(utterance) => format!("⚙  {} turn: \"{}\"", report.speaker, utterance),
        None => format!("⚙  {} turn", report.speaker),
    };
    eprintln!("\n{}", palette.bold(palette.paint(heading, ansi::CYAN)));
    eprintln!(
        "  {} {} {}",
        palette.paint(&report.start_state, ansi::BLUE),
        palette.dim("→"),
        palette.paint(&report.end_state, ansi::BLUE)
    );

    if !report.rules_fired.is_empty() {
        eprintln!("\n{}", palette.paint("━━━ Update rules ━━━", ansi::GRAY));
        for rule in &report.rules_fired {
            eprintln!("  {} {}", palette.paint("✓", ansi::GREEN), palette.paint(rule, ansi::CYAN));
        }
    }

    eprintln!("\n{}", palette.paint("━━━ Steps ━━━", ansi::GRAY));
    for step in &report.steps {
        print_step(step, &palette);
    }

    eprintln!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    let m = &report.metrics;
    eprintln!(
        "  Total: {}  │  Rules: {} ({} evals)  │  Candidates: {}/{} viable",
        palette.paint(format!("{:?}", m.total), ansi::GREEN),
        palette.paint(format!("{:?}", m.rules), ansi::CYAN),
        palette.dim(m.rule_evaluations.to_string()),
        palette.paint(m.candidates_viable.to_string(), ansi::YELLOW),
        palette.dim(m.candidates_evaluated.to_string()),
    );
    eprintln!();
}

fn print_step(step: &StepTrace, palette: &ansi::Palette) {
    let kind = match step.kind {
        StepKind::Transition => "transition",
        StepKind::UpdateRule => "update rule",
        StepKind::ErrorSuccessor => "error successor",
        StepKind::Stay => "stay (rule pending)",
        StepKind::Fallback => "fallback",
        StepKind::End => "end",
    };
    eprintln!(
        "  {} {} {} {}",
        palette.paint(format!("Step {}:", step.step), ansi::BLUE),
        palette.paint(&step.state, ansi::CYAN),
        palette.dim(format!("[{kind}] →")),
        palette.paint(&step.target, ansi::CYAN)
    );

    for (idx, candidate) in step.candidates.iter().enumerate() {
        let marker = if step.chosen == Some(idx) { palette.paint("▶", ansi::GREEN) } else { " ".to_string() };
        eprintln!("    {} {}", marker, fmt_candidate(candidate, palette));
    }
}

fn fmt_candidate(candidate: &CandidateTrace, palette: &ansi::Palette) -> String {
    let outcome = match &candidate.outcome {
        CandidateOutcome::Viable => palette.paint("viable", ansi::GREEN),
        CandidateOutcome::NoMatch => palette.dim("no match"),
        CandidateOutcome::Unresolved => palette.dim("unresolved"),
        CandidateOutcome::EnterGuard => palette.paint("enter guard failed", ansi::YELLOW),
        CandidateOutcome::Gated => palette.paint("gated", ansi::YELLOW),
        CandidateOutcome::UnknownTarget(name) => palette.paint(format!("unknown target `{name}`"), ansi::YELLOW),
    };
    format!(
        "{} {} {} {}",
        palette.paint(format!("{:>5.2}", candidate.score), ansi::YELLOW),
        palette.paint(&candidate.source, ansi::BLUE),
        palette.dim(format!("→ {} │", candidate.target)),
        outcome
    )
}
