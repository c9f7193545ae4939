//! fanin CLI - drive a Resolver with timer sources
//!
//! ## Commands
//!
//! - `run`: register N ticking sources, await R merged rounds, print each
//!   merge as one JSON line on stdout

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fanin_core::{
    init_tracing, MergedResult, PartialResult, Resolver, ResolverConfig, SourceError,
    StreamSource,
};
use futures::StreamExt;
use serde_json::json;
use tracing::{info, Instrument, Level};

#[derive(Parser)]
#[command(name = "fanin")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan N asynchronous sources into merged rounds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen to ticking sources and print each merged round
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Number of sources to register
    #[arg(short, long, default_value_t = 3)]
    sources: usize,

    /// Number of rounds to await before stopping
    #[arg(short, long, default_value_t = 3)]
    rounds: u64,

    /// Emission period of the first source
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Extra period added per source index
    #[arg(long, default_value_t = 25)]
    jitter_ms: u64,

    /// Cancel a round that has not completed within this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Label attached to resolver log events
    #[arg(long, default_value = "fanin")]
    label: String,

    /// Keep the stale round after a cancelled or failed wait
    #[arg(long)]
    no_rearm: bool,
}

impl RunArgs {
    fn config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_label(self.label.clone())
            .with_rearm_after_failure(!self.no_rearm)
    }

    fn period_of(&self, index: usize) -> Duration {
        Duration::from_millis(self.interval_ms + self.jitter_ms * index as u64)
    }
}

/// Source `index` emits `{"src-<index>": tick, "last": index}` every `period`.
fn timer_source(index: usize, period: Duration) -> StreamSource {
    let key = format!("src-{index}");
    StreamSource::new(key.clone(), move || {
        let key = key.clone();
        futures::stream::unfold(0u64, move |tick| {
            let key = key.clone();
            async move {
                tokio::time::sleep(period).await;
                let mut partial = PartialResult::new();
                partial.insert(key, json!(tick));
                partial.insert("last".to_string(), json!(index));
                Some((Ok::<_, SourceError>(partial), tick + 1))
            }
        })
        .boxed()
    })
}

async fn run(args: RunArgs, out: &mut dyn Write) -> Result<Vec<MergedResult>> {
    let resolver = Resolver::with_config(args.config());
    for index in 0..args.sources {
        resolver.register(Arc::new(timer_source(index, args.period_of(index))));
    }
    resolver
        .begin_listening()
        .context("Failed to begin listening")?;
    info!(sources = args.sources, rounds = args.rounds, "fanin run started");

    let deadline = args.deadline_ms.map(Duration::from_millis);
    let mut merged_rounds = Vec::new();

    for n in 1..=args.rounds {
        let outcome = match deadline {
            Some(deadline) => resolver.await_round_within(deadline).await,
            None => resolver.await_round().await,
        };
        let merged = match outcome {
            Ok(merged) => merged,
            Err(e) => {
                resolver.end_listening();
                return Err(e).with_context(|| format!("Round {n} did not complete"));
            }
        };

        writeln!(out, "{}", json!({ "round": n, "merged": merged }))?;
        merged_rounds.push(merged);
    }

    resolver.end_listening();
    Ok(merged_rounds)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => {
            let span = tracing::info_span!("fanin.run", resolver = %args.label);
            let mut stdout = std::io::stdout();
            run(args, &mut stdout).instrument(span).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Commands::Run(args) => args,
        }
    }

    #[test]
    fn run_defaults_parse() {
        let args = run_args(&["fanin", "run"]);
        assert_eq!(args.sources, 3);
        assert_eq!(args.rounds, 3);
        assert_eq!(args.deadline_ms, None);
        assert!(args.config().rearm_after_failure);
    }

    #[test]
    fn run_flags_map_onto_config() {
        let args = run_args(&[
            "fanin",
            "--json",
            "run",
            "--sources",
            "2",
            "--deadline-ms",
            "500",
            "--label",
            "demo",
            "--no-rearm",
        ]);
        assert_eq!(args.sources, 2);
        assert_eq!(args.deadline_ms, Some(500));
        let config = args.config();
        assert_eq!(config.label, "demo");
        assert!(!config.rearm_after_failure);
    }

    #[test]
    fn period_grows_with_index() {
        let args = run_args(&["fanin", "run", "--interval-ms", "10", "--jitter-ms", "5"]);
        assert_eq!(args.period_of(0), Duration::from_millis(10));
        assert_eq!(args.period_of(2), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn run_prints_one_line_per_round() {
        let args = run_args(&["fanin", "run", "--sources", "3", "--rounds", "2"]);
        let mut out = Vec::new();

        let rounds = run(args, &mut out).await.unwrap();
        assert_eq!(rounds.len(), 2);
        for merged in &rounds {
            for i in 0..3 {
                assert!(merged.contains_key(&format!("src-{i}")));
            }
            assert_eq!(merged["last"], json!(2));
        }

        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.lines().count(), 2);
        assert!(printed.starts_with("{\"merged\""));
    }

    #[tokio::test(start_paused = true)]
    async fn run_fails_when_deadline_is_shorter_than_a_tick() {
        let args = run_args(&[
            "fanin",
            "run",
            "--interval-ms",
            "100",
            "--deadline-ms",
            "10",
        ]);
        let mut out = Vec::new();

        let err = run(args, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("Round 1"));
        assert!(out.is_empty());
    }
}
