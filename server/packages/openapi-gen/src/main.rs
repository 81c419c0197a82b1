use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gemini_proxy::router::ApiDoc;
use gemini_proxy::telemetry::init_logging;
use utoipa::OpenApi;

/// Writes the gemini-proxy OpenAPI document.
#[derive(Parser, Debug)]
#[command(name = "gemini-proxy-openapi-gen")]
struct Args {
    /// Output file.
    #[arg(long, default_value = "openapi.json")]
    out: PathBuf,

    /// Print to stdout instead of writing a file.
    #[arg(long, conflicts_with = "out")]
    stdout: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging("info");

    let schema = match ApiDoc::openapi().to_pretty_json() {
        Ok(schema) => schema,
        Err(err) => {
            tracing::error!(error = %err, "failed to render openapi document");
            return ExitCode::FAILURE;
        }
    };

    if args.stdout {
        println!("{schema}");
        return ExitCode::SUCCESS;
    }

    if let Err(err) = std::fs::write(&args.out, format!("{schema}\n")) {
        tracing::error!(path = %args.out.display(), error = %err, "failed to write openapi document");
        return ExitCode::FAILURE;
    }
    tracing::info!(path = %args.out.display(), "wrote openapi document");
    ExitCode::SUCCESS
}
