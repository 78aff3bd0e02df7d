use crate::context::Context;
use anyhow::Context as _;
use epss_core::config::hours;
use epss_core::enrich::{enrich_findings, refresh_stale, Finding};
use std::path::Path;

pub fn run(
    ctx: &Context,
    file: &Path,
    output: Option<&Path>,
    refresh_only: bool,
    max_age_hours: u64,
) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut findings: Vec<Finding> = serde_json::from_str(&data)
        .with_context(|| format!("{} is not a JSON array of findings", file.display()))?;

    let session = ctx.session()?;
    let summary = if refresh_only {
        refresh_stale(&session.service, &mut findings, hours(max_age_hours))
    } else {
        enrich_findings(&session.service, &mut findings)
    };
    session.finish();

    let rendered = serde_json::to_string_pretty(&findings)?;
    match output {
        Some(path) => std::fs::write(path, rendered + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }

    // stdout carries the findings; the summary goes to stderr.
    eprintln!(
        "Enriched {} findings, skipped {}",
        summary.enriched, summary.skipped
    );
    Ok(())
}
