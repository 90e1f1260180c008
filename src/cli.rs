use crate::config::ScriptConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

const SUPPORTED_FLAGS: &str = "--config, --fixture, --output, --script, --rounds, --seed, --data-dir";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub fixture: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub rounds: Option<u32>,
    seed: Option<u64>,
    data_dir: Option<PathBuf>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take a value, e.g. --script main.rhai.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "fixture" => overrides.fixture = Some(PathBuf::from(value)),
                "output" => overrides.output = Some(PathBuf::from(value)),
                "script" => overrides.script = Some(PathBuf::from(value)),
                "data-dir" => overrides.data_dir = Some(PathBuf::from(value)),
                "rounds" => {
                    overrides.rounds =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid rounds '{value}'"))?);
                }
                "seed" => {
                    overrides.seed = Some(value.parse::<u64>().with_context(|| format!("Invalid seed '{value}'"))?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: {SUPPORTED_FLAGS}."),
            }
        }
        Ok(overrides)
    }

    pub fn config_overrides(&self) -> ScriptConfigOverrides {
        ScriptConfigOverrides { data_dir: self.data_dir.clone(), rng_seed: self.seed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_rounds_and_seed() {
        let args = ["harness", "--script", "intro.rhai", "--rounds", "4", "--seed", "99"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.script, Some(PathBuf::from("intro.rhai")));
        assert_eq!(overrides.rounds, Some(4));
        let config = overrides.config_overrides();
        assert_eq!(config.rng_seed, Some(99));
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["harness", "--rounds", "2", "--rounds", "7", "--data-dir", "a", "--data-dir", "b"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.rounds, Some(7));
        assert_eq!(overrides.config_overrides().data_dir, Some(PathBuf::from("b")));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["harness", "--script"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_numbers() {
        let err = CliOverrides::parse(["harness", "--width", "800"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = CliOverrides::parse(["harness", "--rounds", "many"]).unwrap_err();
        assert!(err.to_string().contains("Invalid rounds"));
    }
}
