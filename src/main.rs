mod debug_report;

use std::io::{self, IsTerminal, Read};

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use slotfold::config::Config;
use slotfold::context::{CallContext, EntityCallContext, EntityCallContextForIntent, EvaluationContext, now};
use slotfold::merge::EntityMerge;
use slotfold::{Intent, Locale, classify_entity_types};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &CliConfig) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    let registry = config.registry().map_err(|e| e.to_string())?;
    let intent = select_intent(&config, cli.intent.as_deref())?;

    let mut evaluation = EvaluationContext::at(cli.reference);
    for (role, date) in &cli.role_references {
        evaluation = evaluation.with_role_reference(role.clone(), *date);
    }
    let context = CallContext::new(config.application.clone(), cli.locale.clone(), evaluation);

    let classified = classify_entity_types(
        &registry,
        &EntityCallContext::ForIntent(EntityCallContextForIntent::new(&context, intent.clone())),
        &cli.input,
    );
    let (merged, trace) = EntityMerge::new(&registry, &context).merge_traced(&cli.input, &intent, &[], &classified);

    debug_report::print_run(&cli.input, &intent, &classified, &merged, &trace, cli.color);
    Ok(())
}

fn select_intent(config: &Config, name: Option<&str>) -> Result<Intent, String> {
    match name {
        Some(name) => config.intent(name).ok_or_else(|| format!("intent '{name}' is not configured")),
        None => match config.intents().as_slice() {
            [only] => Ok(only.clone()),
            [] => Err("no intent configured; add [[intents]] to the config file".to_string()),
            _ => Err("several intents configured; pick one with --intent".to_string()),
        },
    }
}

struct CliConfig {
    input: String,
    config: Option<String>,
    intent: Option<String>,
    locale: Locale,
    reference: DateTime<FixedOffset>,
    role_references: Vec<(String, DateTime<FixedOffset>)>,
    color: bool,
}

fn expect_value(args: &mut impl Iterator<Item = String>, option: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("error: {option} expects a value"))
}

fn parse_args() -> Result<CliConfig, String> {
    let mut input: Option<String> = None;
    let mut config = None;
    let mut intent = None;
    let mut locale = Locale::default();
    let mut reference = now();
    let mut role_references = Vec::new();
    let mut color = io::stdout().is_terminal();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("slotfold {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "-c" | "--config" => config = Some(expect_value(&mut args, "--config")?),
            "--intent" => intent = Some(expect_value(&mut args, "--intent")?),
            "--locale" => locale = Locale::new(expect_value(&mut args, "--locale")?),
            "--reference" => reference = parse_reference(&expect_value(&mut args, "--reference")?)?,
            "--role-reference" => role_references.push(parse_role_reference(&expect_value(&mut args, "--role-reference")?)?),
            "--" => {
                let rest = args.by_ref().collect::<Vec<_>>().join(" ");
                if !rest.trim().is_empty() {
                    input = Some(rest);
                }
                break;
            }
            _ if arg.starts_with("--reference=") => reference = parse_reference(arg.trim_start_matches("--reference="))?,
            _ if arg.starts_with("--locale=") => locale = Locale::new(arg.trim_start_matches("--locale=")),
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                input = Some(std::iter::once(arg).chain(args.by_ref()).collect::<Vec<_>>().join(" "));
                break;
            }
        }
    }

    let input = match input {
        Some(value) => value,
        None => read_stdin_input()?,
    };

    if input.trim().is_empty() {
        return Err(format!("error: no input provided\n\n{}", help_text()));
    }

    Ok(CliConfig { input, config, intent, locale, reference, role_references, color })
}

fn read_stdin_input() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer.trim_end().to_string())
}

/// RFC 3339, or a local time without offset.
fn parse_reference(value: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|date| date.fixed_offset())
        .ok_or_else(|| format!("error: invalid --reference '{value}' (expected RFC 3339 or YYYY-MM-DDTHH:MM:SS)"))
}

fn parse_role_reference(value: &str) -> Result<(String, DateTime<FixedOffset>), String> {
    let (role, date) =
        value.split_once('=').ok_or_else(|| format!("error: invalid --role-reference '{value}' (expected ROLE=TIMESTAMP)"))?;
    Ok((role.to_string(), parse_reference(date)?))
}

fn help_text() -> String {
    format!(
        "slotfold {version}

Classify and merge the entities of one utterance for an intent.

Usage:
  slotfold [OPTIONS] [--] <text...>

Options:
  -c, --config <file>             TOML configuration (providers, dictionaries, intents).
                                  Default: built-in providers, no intents.
  --intent <name>                 Intent whose slots are filled. Optional when the
                                  configuration declares a single intent.
  --locale <tag>                  Locale of the text. Default: en
  --reference <timestamp>         Reference time, RFC 3339 or YYYY-MM-DDTHH:MM:SS.
                                  Default: now
  --role-reference <role=ts>      Reference time for one role; its values are
                                  evaluated again once bound. Repeatable.
  --color                         Force ANSI color output.
  --no-color                      Disable ANSI color output.
  -h, --help                      Show this help message.
  -V, --version                   Print version information.

Environment:
  RUST_LOG                        Log filter, e.g. slotfold=debug.

Exit codes:
  0  Success.
  1  Configuration or provider error.
  2  Invalid arguments or missing input.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
