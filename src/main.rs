mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use demucs_onnx::error::error_chain;
use demucs_onnx::{
    convert, BuiltinRepository, DummyInput, ExportConfig, ExportEvent, ExportResult, LocalRepository,
    ModelRepository,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const MB: f64 = 1024.0 * 1024.0;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(&cli) {
        Ok(result) => {
            report(&result);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("✗ Error during ONNX export: {}", error_chain(e.as_ref()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExportResult> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::from_path(path)
            .with_context(|| format!("reading export configuration {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.dummy_input = DummyInput::Seeded(seed);
    }

    let repo: Box<dyn ModelRepository> = match &cli.repo {
        Some(dir) => Box::new(LocalRepository::new(dir)),
        None => Box::new(BuiltinRepository::new()),
    };

    let result = convert(repo.as_ref(), &cli.model, &cli.dest_dir, &config, &mut progress)?;
    if let Ok(json) = serde_json::to_string_pretty(&result.manifest) {
        tracing::debug!("Manifest:\n{}", json);
    }
    Ok(result)
}

fn progress(event: &ExportEvent) {
    match event {
        ExportEvent::Resolving { model } => println!("Loading model: {}", model),
        ExportEvent::SynthesizingInput { shape } => println!("Creating dummy input with shape {:?}", shape),
        ExportEvent::DerivingSpectrogram { shape } => println!("Computing spectrogram input with shape {:?}", shape),
        ExportEvent::Tracing => println!("Tracing model..."),
        ExportEvent::Optimizing { nodes } => println!("Optimizing graph ({} nodes)...", nodes),
        ExportEvent::Serializing { path } => println!("Exporting to ONNX: {}", path.display()),
    }
}

fn report(result: &ExportResult) {
    println!("✓ Model successfully exported to {}", result.artifact_path.display());
    println!("  File size: {:.2} MB", result.byte_size as f64 / MB);
    if let (Some(path), Some(size)) = (&result.external_data_path, result.external_data_size) {
        println!("  External data: {} ({:.2} MB)", path.display(), size as f64 / MB);
    }
}
