use lamellar_gemm::{run_sweep, Config, SweepConfig};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("invalid LAMELLAR_GEMM_* environment")?;
    let sweep = SweepConfig::from_config(&config)?;
    tracing::debug!("sweep: {:?}", sweep);

    let reports = run_sweep(&sweep);
    for report in &reports {
        println!("\n{}\n", report);
    }
    let expected = sweep.trial_count();
    if reports.len() < expected {
        anyhow::bail!(
            "{} of {} trials failed (rerun with RUST_LOG=warn for details)",
            expected - reports.len(),
            expected
        );
    }
    Ok(())
}
