use crate::context::Context;
use crate::output::{percent, print_json, print_table};
use epss_core::{CveId, EpssScore};

pub fn run(ctx: &Context, ids: &[String], json: bool) -> anyhow::Result<()> {
    // Validate everything up front so a typo never costs a network round trip.
    let requested = ids
        .iter()
        .map(|raw| CveId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let session = ctx.session()?;
    let found = session.service.lookup(&requested);
    session.finish();

    let mut scores: Vec<&EpssScore> = found.values().collect();
    scores.sort_by(|a, b| a.cve_id.cmp(&b.cve_id));

    let mut missing: Vec<&CveId> = requested
        .iter()
        .filter(|id| !found.contains_key(*id))
        .collect();
    missing.sort();
    missing.dedup();

    if json {
        let value = serde_json::json!({
            "scores": scores,
            "missing": missing,
        });
        return print_json(&value);
    }

    if !scores.is_empty() {
        let rows = scores
            .iter()
            .map(|s| {
                vec![
                    s.cve_id.to_string(),
                    format!("{:.5}", s.epss_score),
                    percent(s.percentile),
                    s.date.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        print_table(&["CVE", "EPSS", "PERCENTILE", "DATE"], rows);
    }

    if !missing.is_empty() {
        let list: Vec<&str> = missing.iter().map(|id| id.as_str()).collect();
        println!("No EPSS score: {}", list.join(", "));
    }
    Ok(())
}
