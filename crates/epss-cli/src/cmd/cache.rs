use crate::context::Context;
use crate::output::{percent, print_json, print_table};
use anyhow::Context as _;
use chrono::Utc;
use clap::Subcommand;
use epss_core::config::hours;
use epss_core::store::ScoreDb;
use epss_core::CveId;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum CacheSubcommand {
    /// List cached scores and their age
    Show,

    /// Delete every cached score
    Clear,

    /// Refetch cached scores older than the freshness window
    Refresh {
        /// Override the freshness window, in hours
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(ctx: &Context, subcmd: CacheSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        CacheSubcommand::Show => show(ctx, json),
        CacheSubcommand::Clear => clear(ctx, json),
        CacheSubcommand::Refresh { max_age_hours } => refresh(ctx, max_age_hours, json),
    }
}

fn open(ctx: &Context) -> anyhow::Result<ScoreDb> {
    if !ctx.use_snapshot {
        anyhow::bail!("cache commands need the on-disk cache; drop --no-cache");
    }
    let path = ctx.config.resolved_cache_path()?;
    ScoreDb::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let db = open(ctx)?;
    let scores = db.list_all()?;
    let now = Utc::now();
    let window = ctx.config.freshness_window();

    if json {
        let entries: Vec<serde_json::Value> = scores
            .iter()
            .map(|s| {
                serde_json::json!({
                    "score": s,
                    "fresh": s.is_fresh(now, window),
                })
            })
            .collect();
        return print_json(&serde_json::json!({ "entries": entries }));
    }

    if scores.is_empty() {
        println!("Score cache is empty.");
        return Ok(());
    }

    let rows = scores
        .iter()
        .map(|s| {
            vec![
                s.cve_id.to_string(),
                format!("{:.5}", s.epss_score),
                percent(s.percentile),
                format!("{}h", s.age(now).num_hours()),
                if s.is_fresh(now, window) {
                    "fresh".to_string()
                } else {
                    "stale".to_string()
                },
            ]
        })
        .collect();
    print_table(&["CVE", "EPSS", "PERCENTILE", "AGE", "STATUS"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// clear
// ---------------------------------------------------------------------------

fn clear(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let db = open(ctx)?;
    let removed = db.list_all()?.len();
    db.clear()?;
    if json {
        print_json(&serde_json::json!({ "removed": removed }))?;
    } else {
        println!("Removed {removed} cached scores.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// refresh
// ---------------------------------------------------------------------------

fn refresh(ctx: &Context, max_age_hours: Option<u64>, json: bool) -> anyhow::Result<()> {
    let max_age = max_age_hours
        .map(hours)
        .unwrap_or_else(|| ctx.config.freshness_window());

    let stale = {
        let db = open(ctx)?;
        db.stale(Utc::now(), max_age)?
    };
    if stale.is_empty() {
        if json {
            print_json(&serde_json::json!({ "refreshed": 0, "skipped": 0 }))?;
        } else {
            println!("No stale scores found.");
        }
        return Ok(());
    }

    let ids: Vec<CveId> = stale.iter().map(|s| s.cve_id.clone()).collect();
    let session = ctx.session()?;
    // Entries younger than `max_age` but older than the service window must still refetch.
    for id in &ids {
        session.service.cache().invalidate(id);
    }
    let found = session.service.lookup(&ids);
    session.finish();

    let refreshed = stale
        .iter()
        .filter(|old| {
            found
                .get(&old.cve_id)
                .is_some_and(|new| new.retrieved_at > old.retrieved_at)
        })
        .count();
    let skipped = stale.len() - refreshed;

    if json {
        print_json(&serde_json::json!({ "refreshed": refreshed, "skipped": skipped }))?;
    } else {
        println!("Refreshed {refreshed} scores, skipped {skipped}.");
    }
    Ok(())
}
