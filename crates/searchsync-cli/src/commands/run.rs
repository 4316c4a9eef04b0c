use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::watch;

use searchsync_engine::config::{parser, validator};
use searchsync_engine::{build_pipeline, CycleOutcome, RunOptions, RunSummary};

/// Execute the `run` command: parse, validate and run a pipeline.
///
/// Without `--once` the pipeline loops until Ctrl-C, finishing the run in
/// progress before exiting.
pub async fn execute(pipeline_path: &Path, once: bool, max_runs: Option<u64>) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        entities = config.entities.len(),
        state_backend = ?config.state.backend,
        "Pipeline validated"
    );

    let name = config.pipeline.clone();
    let mut pipeline = build_pipeline(config)?;

    if once {
        let summary = pipeline.run_once().await?;
        print_summary(&name, &summary);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current run");
            let _ = shutdown_tx.send(true);
        }
    });

    let stats = pipeline
        .run_forever(shutdown_rx, RunOptions { max_runs })
        .await?;

    println!("Pipeline '{name}' stopped.");
    println!("  Runs:             {}", stats.runs);
    println!("  Failed runs:      {}", stats.failed_runs);
    println!("  Documents loaded: {}", stats.documents_loaded);
    Ok(())
}

fn print_summary(name: &str, summary: &RunSummary) {
    println!("Pipeline '{name}' completed successfully.");
    for report in &summary.entities {
        match &report.outcome {
            CycleOutcome::NoNewData => println!("  {:12} no new data", report.entity.as_str()),
            CycleOutcome::Loaded {
                documents,
                failed,
                watermark,
                malformed,
                ..
            } => {
                print!(
                    "  {:12} {documents} loaded, {failed} failed, watermark {watermark}",
                    report.entity.as_str()
                );
                if *malformed {
                    print!(" (kept: malformed cursor)");
                }
                println!();
            }
        }
    }
    println!("  Duration:     {:.2}s", summary.duration_secs);
}
