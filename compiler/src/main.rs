use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;

use smc::decl::Declaration;
use smc::pipeline::{self, BuildRequest};
use smc::registry::Registry;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Model,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "smc",
    version,
    about = "Schema model compiler — resolves declared schema sources into an effective model"
)]
struct Cli {
    /// Input declaration files (JSON, one forest or one root per file)
    sources: Vec<PathBuf>,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Model)]
    emit: EmitStage,

    /// Supported feature (repeatable; omitting means all features)
    #[arg(long = "feature")]
    features: Vec<String>,

    /// Module whose deviations apply (repeatable; omitting means all)
    #[arg(long = "deviation-module")]
    deviation_modules: Vec<String>,

    /// Print build phases and detail to stderr
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.sources.is_empty() {
        eprintln!("smc: error: no input files");
        std::process::exit(2);
    }

    // ── Read the declaration forest ──
    let mut forest: Vec<Declaration> = Vec::new();
    let mut raw_input = String::new();
    for path in &cli.sources {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("smc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        };
        raw_input.push_str(&text);
        match parse_forest(&text) {
            Ok(mut roots) => forest.append(&mut roots),
            Err(e) => {
                eprintln!("smc: error: {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    if cli.verbose {
        eprintln!("smc: {} source root(s) loaded", forest.len());
    }

    let registry = Registry::with_builtins();
    let provenance = pipeline::compute_provenance(&raw_input, &registry);

    if matches!(cli.emit, EmitStage::BuildInfo) {
        emit_output(cli.output.as_deref(), &provenance.to_json());
        return;
    }

    // ── Run the build ──
    let mut request = BuildRequest::new(forest);
    if !cli.features.is_empty() {
        request.supported_features = Some(cli.features.into_iter().collect::<HashSet<_>>());
    }
    if !cli.deviation_modules.is_empty() {
        request.deviation_modules =
            Some(cli.deviation_modules.into_iter().collect::<HashSet<_>>());
    }

    let model = match pipeline::build(&registry, request) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("smc: error: {}", e);
            let mut cause = e.cause();
            while let Some(c) = cause {
                eprintln!("smc:   caused by: {}", c);
                cause = c.cause();
            }
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("smc: {} module(s) in effective model", model.modules.len());
    }

    let json = match serde_json::to_string_pretty(&model) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("smc: error: serializing model: {}", e);
            std::process::exit(1);
        }
    };
    emit_output(cli.output.as_deref(), &json);
}

/// A file holds either one root object or an array of roots.
fn parse_forest(text: &str) -> Result<Vec<Declaration>, serde_json::Error> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Declaration>>(text)
    } else {
        serde_json::from_str::<Declaration>(text).map(|d| vec![d])
    }
}

fn emit_output(path: Option<&std::path::Path>, content: &str) {
    match path {
        Some(p) => {
            if let Err(e) = std::fs::write(p, content) {
                eprintln!("smc: error: {}: {}", p.display(), e);
                std::process::exit(2);
            }
        }
        None => println!("{content}"),
    }
}
