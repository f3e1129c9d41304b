//! radiomeshd — runs the link and mesh transports against simulated radios
//! and reports transfer statistics as JSON.
//!
//! Usage: radiomeshd [link|mesh|all] [rounds]

use anyhow::{bail, Context, Result};

use radiomesh_core::config::RadiomeshConfig;

mod soak;

use soak::{SoakPlan, SoakReport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = RadiomeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RadiomeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RadiomeshConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "all".to_string());
    let rounds = match args.next() {
        Some(n) => n.parse().context("rounds must be a number")?,
        None => 64,
    };
    let plan = match mode.as_str() {
        "link" => SoakPlan { link: true, mesh: false, rounds },
        "mesh" => SoakPlan { link: false, mesh: true, rounds },
        "all" => SoakPlan { link: true, mesh: true, rounds },
        other => bail!("unknown mode {other:?}, expected link, mesh or all"),
    };
    tracing::info!(mode, rounds, "radiomeshd starting");

    let report: SoakReport = tokio::select! {
        r = soak::run(&config, plan) => r?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failures() > 0 {
        bail!("{} soak rounds failed", report.failures());
    }
    Ok(())
}
