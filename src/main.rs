use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::Parser;

use pg_scrub::driver::Rewriter;
use pg_scrub::error::{PgScrubError, Result};
use pg_scrub::rules::{RuleAction, RuleSpec, RuleTransform};
use pg_scrub::transform::Identity;

#[cfg(feature = "mimalloc-allocator")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "pg_scrub",
    version,
    about = "Streaming rewriter for PostgreSQL custom-format dumps"
)]
struct Args {
    /// JSON file with an array of rewrite rules
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Inline rule PATTERN=REPLACEMENT (can be specified multiple times)
    #[arg(long = "replace")]
    replace: Vec<String>,

    /// Inline pseudonymization rule PATTERN (can be specified multiple times).
    /// Matches are replaced by HMAC-SHA256 tokens keyed with $SECRET_KEY.
    #[arg(long = "pseudonymize")]
    pseudonymize: Vec<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("pg_scrub error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut specs: Vec<RuleSpec> = Vec::new();
    if let Some(path) = &args.rules {
        let file = File::open(path)?;
        let mut from_file: Vec<RuleSpec> = serde_json::from_reader(file)?;
        specs.append(&mut from_file);
    }
    for rule in &args.replace {
        let (pattern, replacement) = rule.split_once('=').ok_or_else(|| {
            PgScrubError::Transform(format!(
                "--replace expects PATTERN=REPLACEMENT, got {:?}",
                rule
            ))
        })?;
        specs.push(RuleSpec {
            pattern: pattern.to_string(),
            action: RuleAction::Replace {
                replacement: replacement.to_string(),
            },
        });
    }
    for pattern in &args.pseudonymize {
        specs.push(RuleSpec {
            pattern: pattern.clone(),
            action: RuleAction::Pseudonym { length: 16 },
        });
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = stdin.lock();
    let writer = stdout.lock();

    if specs.is_empty() {
        Rewriter::new(Identity).process(reader, writer)
    } else {
        let key = std::env::var("SECRET_KEY").unwrap_or_default().into_bytes();
        let transform = RuleTransform::new(specs, key)?;
        Rewriter::new(transform).process(reader, writer)
    }
}
