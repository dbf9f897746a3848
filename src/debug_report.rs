use slotfold::merge::{MergeTrace, Outcome};
use slotfold::{EntityRecognition, EntityTypeRecognition, Intent, Value};

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

pub fn print_run(
    input: &str,
    intent: &Intent,
    classified: &[EntityTypeRecognition],
    merged: &[EntityRecognition],
    trace: &MergeTrace,
    color: bool,
) {
    let palette = ansi::Palette::new(color);
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Merging: \"{}\"", input), ansi::CYAN)));
    println!(
        "  {} {}  {} {}",
        palette.dim("intent:"),
        palette.paint(&intent.name, ansi::BLUE),
        palette.dim("│ slots:"),
        palette.paint(intent.entities.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "), ansi::CYAN),
    );

    println!("\n{}", palette.paint("━━━ Classification ━━━", ansi::GRAY));
    if classified.is_empty() {
        println!("{}", palette.dim("  No entity type recognized"));
    }
    for (idx, recognition) in classified.iter().enumerate() {
        println!(
            "  {} {} {} {}  {}",
            palette.paint(format!("[{}]", idx), ansi::GRAY),
            palette.paint(format!("span {}", recognition.span), ansi::YELLOW),
            palette.paint(&recognition.entity_type.name, ansi::BLUE),
            palette.dim(format!("p={:.2}", recognition.probability)),
            palette.dim(excerpt(input, recognition.span.start, recognition.span.end)),
        );
    }

    if trace.short_circuit {
        println!("\n{}", palette.dim("  Nothing to reconcile; bound entities kept as-is"));
    } else {
        println!("\n{}", palette.paint("━━━ Candidates ━━━", ansi::GRAY));
        print_candidates(trace, &palette);

        println!("\n{}", palette.paint("━━━ Decisions ━━━", ansi::GRAY));
        print_decisions(trace, &palette);
    }

    println!("\n{}", palette.paint("━━━ Results ━━━", ansi::GRAY));
    if merged.is_empty() {
        println!("{}", palette.dim("  No entity retained"));
        println!("\n{}", palette.paint("Possible reasons:", ansi::YELLOW));
        println!("  • No provider recognized a slot type of the intent");
        println!("  • Evaluation produced no value for the winning candidate");
        println!("\n{}", palette.dim("  Tip: Set RUST_LOG=slotfold=debug to see provider calls"));
    } else {
        print_results(input, merged, &palette);
    }

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!("  Merge: {}", palette.paint(format!("{:?}", trace.total), ansi::GREEN));
    println!();
}

fn print_candidates(trace: &MergeTrace, palette: &ansi::Palette) {
    for (idx, candidate) in trace.candidates.iter().enumerate() {
        let role = match &candidate.role {
            Some(role) => palette.paint(format!("bound to {role}"), ansi::GREEN),
            None => palette.dim("unbound"),
        };
        println!(
            "  {} {} {} {}  {}",
            palette.paint(format!("[{}]", idx), ansi::GRAY),
            palette.paint(format!("w={:.3}", candidate.weight), ansi::CYAN),
            palette.paint(format!("span {}", candidate.span), ansi::YELLOW),
            palette.paint(&candidate.type_name, ansi::BLUE),
            role,
        );
    }
}

fn print_decisions(trace: &MergeTrace, palette: &ansi::Palette) {
    if trace.decisions.is_empty() {
        println!("{}", palette.dim("  No overlap group"));
        return;
    }
    for decision in &trace.decisions {
        let available = decision.available.iter().map(|i| format!("[{i}]")).collect::<Vec<_>>().join(" ");
        let outcome = match &decision.outcome {
            Outcome::Kept => palette.paint("kept", ansi::GREEN),
            Outcome::Dropped => palette.dim("dropped (no value)"),
            Outcome::Promoted { role } => palette.paint(format!("promoted to {role}"), ansi::GREEN),
            Outcome::Orphan { role, ambiguous: false } => palette.paint(format!("bound to {role}"), ansi::GREEN),
            Outcome::Orphan { role, ambiguous: true } => {
                palette.paint(format!("bound to {role} (several slots accept it)"), ansi::YELLOW)
            }
        };
        println!(
            "  {} {} {} {}{}",
            palette.dim(available),
            palette.dim("→"),
            palette.bold(format!("[{}]", decision.winner)),
            outcome,
            if decision.subsumption_bonus { palette.dim("  +subsumption") } else { String::new() },
        );
    }
}

fn print_results(input: &str, merged: &[EntityRecognition], palette: &ansi::Palette) {
    for (idx, recognition) in merged.iter().enumerate() {
        let value = match &recognition.value {
            Some(value) => palette.bold(palette.paint(fmt_value(value), ansi::GREEN)),
            None => palette.dim("<no value>"),
        };
        println!(
            "  {} {} {} {}",
            palette.paint(format!("[{}]", idx), ansi::GRAY),
            value,
            palette.dim("│"),
            palette.paint(format!("span {}", recognition.span), ansi::YELLOW),
        );
        println!(
            "      {} {}  {} {}",
            palette.dim("entity:"),
            palette.paint(recognition.entity.to_string(), ansi::BLUE),
            palette.dim("│ text:"),
            palette.paint(excerpt(input, recognition.span.start, recognition.span.end), ansi::CYAN)
        );
        for sub in &recognition.sub_entities {
            println!(
                "      {} {} {}",
                palette.dim("└"),
                palette.paint(sub.entity.to_string(), ansi::BLUE),
                sub.value.as_ref().map(fmt_value).unwrap_or_default(),
            );
        }
    }
}

fn fmt_value(value: &Value) -> String {
    match value {
        Value::Date(date) => format!("{} ({:?})", date.date.to_rfc3339(), date.grain),
        Value::DateInterval(interval) => {
            format!("{} → {}", interval.from.date.to_rfc3339(), interval.to.date.to_rfc3339())
        }
        Value::Number { value } | Value::Ordinal { value } => value.to_string(),
        Value::Duration { seconds } => format!("{seconds}s"),
        Value::Quantity { value, unit, .. } => format!("{value} {unit}"),
        Value::Text { value, .. } => value.clone(),
        Value::Custom(custom) => custom.value.clone(),
    }
}

/// Char-indexed slice of the input.
fn excerpt(input: &str, start: usize, end: usize) -> String {
    input.chars().skip(start).take(end.saturating_sub(start)).collect()
}
