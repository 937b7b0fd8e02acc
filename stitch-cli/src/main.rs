use std::process::ExitCode;

use clap::Parser;
use stitch_cli::cli_args::Opt;
use stitch_cli::runner::stitch;
use tracing::error;
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_writer(std::io::stderr)
            .finish(),
    ) {
        eprintln!("failed to install the tracing subscriber: {e}");
    }

    // Usage errors exit 1 rather than clap's 2; help and version exit 0.
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let summary_json = opt.summary_json;
    let result = match tokio::task::spawn_blocking(move || stitch(&opt)).await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("decode task failed: {e}")),
    };

    match result {
        Ok(report) => {
            if summary_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!("failed to serialize the run summary: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
