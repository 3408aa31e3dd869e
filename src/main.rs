use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use speech_gen_eval::evaluation::{run_evaluation, EvalConfig};
use speech_gen_eval::evaluators::SystemType;

/// Objective evaluation of synthesized speech.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of synthesized audio to evaluate
    #[arg(long)]
    generated_audio: PathBuf,

    /// Directory of original audio, required for reference-based scorers
    #[arg(long)]
    original_audio: Option<PathBuf>,

    /// File mapping generated ids to reference ids, one `<id> <ref-id>` per line
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Manifest of utterances, one `<id> <text>` per line
    #[arg(long)]
    txt: PathBuf,

    /// Type of the system under evaluation
    #[arg(long = "type", value_enum, default_value_t = SystemType::ZeroTts)]
    system_type: SystemType,

    /// Explicit evaluator list, only valid with --type custom
    #[arg(long, num_args = 1..)]
    evaluators: Option<Vec<String>>,

    /// Skip missing or failing utterances instead of aborting
    #[arg(long)]
    ignore_missing: bool,

    /// Write a YAML report to this path
    #[arg(long)]
    out: Option<PathBuf>,

    /// Worker pool width for audio conversion and scoring
    #[arg(long, default_value_t = 8)]
    jobs: usize,

    /// Extra `key=value` pairs copied verbatim into the report
    #[arg(long, value_parser = parse_key_value)]
    extra: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = EvalConfig {
        manifest: args.txt,
        generated_audio: args.generated_audio,
        original_audio: args.original_audio,
        mapping: args.mapping,
        system_type: args.system_type,
        evaluators: args.evaluators,
        ignore_missing: args.ignore_missing,
        out: args.out,
        jobs: args.jobs,
        extra: args.extra.into_iter().collect::<BTreeMap<_, _>>(),
    };

    run_evaluation(&config).await?;
    Ok(())
}
