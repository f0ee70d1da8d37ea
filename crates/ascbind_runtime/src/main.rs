//! ascbind runtime
//!
//! Loads a bucketing module from disk and exercises it from the command line:
//!
//! ```text
//! ascbind <module.wasm> [--config <bridge.json>] [--seed <u32>] [key ...]
//! ```

use anyhow::{bail, Context, Result};
use ascbind_bucketing::{BucketingModule, VariableType};
use ascbind_core::{BridgeConfig, ImportOverrides};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq)]
struct Args {
    module: PathBuf,
    config: Option<PathBuf>,
    seed: u32,
    keys: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut module = None;
    let mut config = None;
    let mut seed = 1;
    let mut keys = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--seed" => {
                let value = args.next().context("--seed needs a value")?;
                seed = value
                    .parse()
                    .with_context(|| format!("invalid seed `{value}`"))?;
            }
            _ if module.is_none() => module = Some(PathBuf::from(arg)),
            _ => keys.push(arg),
        }
    }

    let Some(module) = module else {
        bail!("usage: ascbind <module.wasm> [--config <bridge.json>] [--seed <u32>] [key ...]");
    };
    Ok(Args {
        module,
        config,
        seed,
        keys,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    tracing::info!("ascbind v{}", ascbind_core::VERSION);

    let config = match &args.config {
        Some(path) => BridgeConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    let binary = std::fs::read(&args.module)
        .with_context(|| format!("reading {}", args.module.display()))?;
    let mut module = BucketingModule::instantiate(&binary, ImportOverrides::new(), config)
        .with_context(|| format!("instantiating {}", args.module.display()))?;

    let codes = module.variable_type_codes();
    for ty in VariableType::ALL {
        tracing::info!(variable_type = %ty, code = codes.code(ty), "variable type");
    }

    for key in &args.keys {
        let hash = module
            .murmurhash_v3(key, args.seed)
            .with_context(|| format!("hashing `{key}`"))?;
        println!("{key}\t{hash}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn module_then_keys() {
        let parsed = parse_args(args(&["bucketing.wasm", "a", "b"])).unwrap();
        assert_eq!(parsed.module, PathBuf::from("bucketing.wasm"));
        assert_eq!(parsed.keys, ["a", "b"]);
        assert_eq!(parsed.seed, 1);
        assert_eq!(parsed.config, None);
    }

    #[test]
    fn flags_anywhere() {
        let parsed = parse_args(args(&["--seed", "7", "m.wasm", "--config", "c.json", "k"])).unwrap();
        assert_eq!(parsed.seed, 7);
        assert_eq!(parsed.config, Some(PathBuf::from("c.json")));
        assert_eq!(parsed.keys, ["k"]);
    }

    #[test]
    fn module_is_required() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["--seed", "x", "m.wasm"])).is_err());
    }
}
