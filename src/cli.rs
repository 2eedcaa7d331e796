use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "demucs-onnx", version, about = "Export Demucs models to ONNX with dynamic time axes")]
pub struct Cli {
    /// Directory to write the ONNX model into (created if missing)
    pub dest_dir: PathBuf,

    /// Model to export
    #[arg(long, default_value = "htdemucs")]
    pub model: String,

    /// Local model repository (<name>.json + <signature>.safetensors)
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Export configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seed for the dummy input waveform (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}
