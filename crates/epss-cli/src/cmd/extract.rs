use crate::output::print_json;
use anyhow::Context;
use epss_core::cve::extract_all_cves;
use std::io::Read;

pub fn run(text: Option<&str>, json: bool) -> anyhow::Result<()> {
    let input = match text {
        Some(t) => t.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let ids = extract_all_cves(&input);
    if json {
        return print_json(&ids);
    }
    for id in &ids {
        println!("{id}");
    }
    Ok(())
}
