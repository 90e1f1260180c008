use std::fs::File;

use anyhow::{Context, Result};
use kestrel_script::cli::CliOverrides;
use kestrel_script::config::ScriptConfig;
use kestrel_script::logging::init_tracing;
use kestrel_script::script_harness::{load_fixture, run_fixture, HarnessFixture};

fn main() {
    init_tracing();
    if let Err(err) = run_cli() {
        eprintln!("[script-harness] error: {err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = CliOverrides::parse_from_env()?;
    let mut config = match &opts.config {
        Some(path) => ScriptConfig::load(path)?,
        None => ScriptConfig::default(),
    };
    let overrides = opts.config_overrides();
    if !overrides.is_empty() {
        tracing::info!(target: "script", fields = ?overrides.applied_fields(), "applying command line overrides");
        config.apply_overrides(&overrides);
    }

    let mut fixture = match &opts.fixture {
        Some(path) => load_fixture(path)?,
        None => serde_json::from_str::<HarnessFixture>("{}").context("building default fixture")?,
    };
    if let Some(script) = &opts.script {
        fixture.script = script.display().to_string();
    }
    if let Some(rounds) = opts.rounds {
        fixture.rounds = rounds;
    }

    let output = run_fixture(&fixture, &config)?;
    match &opts.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
            serde_json::to_writer_pretty(file, &output).context("serializing harness output")?;
            println!("[script-harness] wrote {}", path.display());
        }
        None => {
            serde_json::to_writer_pretty(std::io::stdout(), &output)?;
            println!();
        }
    }
    Ok(())
}
