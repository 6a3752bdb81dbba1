use std::collections::HashMap;
use std::path::PathBuf;

use candle_core::Device;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use speech_distill::{load_model_and_config, DistillError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

/// Inspect a checkpoint directory and dump its resolved configuration.
#[derive(Debug, Parser)]
#[command(name = "model_info")]
struct Args {
    /// Checkpoint directory holding config.json and model.safetensors.
    checkpoint_dir: PathBuf,

    /// Compute device for weight loading ("cpu" or "cuda").
    #[arg(long, default_value = "cpu")]
    device: String,

    #[arg(long, value_enum, default_value = "yaml")]
    format: OutputFormat,

    /// Write the resolved config here instead of stdout; the extension
    /// selects the format.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Top-level config overrides as KEY=VALUE; VALUE is parsed as JSON,
    /// falling back to a plain string.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), DistillError> {
    let device = match args.device.as_str() {
        "cuda" => Device::new_cuda(0).map_err(|e| DistillError::Model {
            context: "CUDA init",
            message: e.to_string(),
        })?,
        _ => Device::Cpu,
    };

    let overrides = parse_overrides(&args.overrides)?;
    let overrides = (!overrides.is_empty()).then_some(&overrides);

    let loaded = load_model_and_config(&args.checkpoint_dir, overrides, &device)?;

    tracing::info!(
        model_type = loaded.model.model_type().as_str(),
        layers = loaded.model.num_layers(),
        hidden_size = loaded.config.hidden_size,
        task_agnostic = loaded.task_agnostic,
        frame_stride_ms = loaded.config.frame_stride_ms(16_000),
        "checkpoint inspected"
    );

    match args.output {
        Some(path) => loaded.config.dump(&path)?,
        None => {
            let rendered = match args.format {
                OutputFormat::Json => loaded.config.to_json_pretty()?,
                OutputFormat::Yaml => loaded.config.to_yaml()?,
            };
            println!("{rendered}");
        }
    }
    Ok(())
}

fn parse_overrides(raw: &[String]) -> Result<HashMap<String, serde_json::Value>, DistillError> {
    let mut overrides = HashMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| DistillError::InvalidInput {
            message: format!("override '{entry}' must be KEY=VALUE"),
        })?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}
