use std::path::Path;

use anyhow::{Context, Result};

use searchsync_engine::check_pipeline;
use searchsync_engine::config::{parser, validator};

/// Execute the `check` command: validate pipeline config and probe every backend.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    let result = check_pipeline(&config).await;

    print_status("Checkpoint store", result.state_ok);
    print_status("Source", result.source_ok);
    print_status("Index", result.index_ok);

    if result.all_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_status(label: &str, ok: bool) {
    println!("{:18} {}", format!("{label}:"), if ok { "OK" } else { "FAILED" });
}
