//! rank-shortcuts: rank a JSON list of shortcut tiles against a Places history.
//!
//! Usage: `rank-shortcuts <places.sqlite> <items.json> [--startup] [--profile <dir>]`
//!
//! Opens the history database read-only, so it can run next to the browser.
//! Ranker prefs and learned state live in the profile directory
//! (`~/.shortcut-ranker` by default). The ordered items are printed to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use shortcut_ranker::{
    load_config, InteractionAggregator, JsonFileCache, LocalCompute, ProfilePaths, RankableItem,
    ShortcutRanker, SqliteExecutor,
};

const USAGE: &str = "usage: rank-shortcuts <places.sqlite> <items.json> [--startup] [--profile <dir>]";

struct Args {
    places: PathBuf,
    items: PathBuf,
    is_startup: bool,
    profile: Option<PathBuf>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut is_startup = false;
    let mut profile = None;

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--startup" => is_startup = true,
            "--profile" => {
                let dir = raw.next().context("--profile needs a directory")?;
                profile = Some(PathBuf::from(dir));
            }
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [places, items]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!(USAGE))?;

    Ok(Args {
        places,
        items,
        is_startup,
        profile,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = parse_args(std::env::args().skip(1))?;

    let profile = match args.profile {
        Some(dir) => ProfilePaths::new(dir),
        None => ProfilePaths::default_profile()?,
    };
    let config = load_config(&profile.config_path())
        .map_err(|e| anyhow::anyhow!("Failed to load ranker config: {e}"))?;

    let items_json = std::fs::read_to_string(&args.items)
        .with_context(|| format!("Failed to read {}", args.items.display()))?;
    let items: Vec<RankableItem> = serde_json::from_str(&items_json)
        .with_context(|| format!("Failed to parse {}", args.items.display()))?;

    let history = SqliteExecutor::open_readonly(&args.places)
        .await
        .with_context(|| format!("Failed to open history {}", args.places.display()))?;

    let ranker = ShortcutRanker::new(
        Arc::new(InteractionAggregator::new(history)),
        Arc::new(LocalCompute::new()),
        Arc::new(JsonFileCache::new(profile.cache_path())),
    );

    log::info!(
        "Ranking {} shortcuts (startup: {})",
        items.len(),
        args.is_startup
    );
    let ranked = ranker
        .rank_or_fallback(items, &config, args.is_startup)
        .await;

    println!("{}", serde_json::to_string_pretty(&ranked)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_positional_and_flags() {
        let parsed = args(&["places.sqlite", "--startup", "items.json", "--profile", "/tmp/p"]).unwrap();
        assert_eq!(parsed.places, PathBuf::from("places.sqlite"));
        assert_eq!(parsed.items, PathBuf::from("items.json"));
        assert!(parsed.is_startup);
        assert_eq!(parsed.profile, Some(PathBuf::from("/tmp/p")));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(args(&["places.sqlite"]).is_err());
        assert!(args(&["a", "b", "c"]).is_err());
        assert!(args(&["a", "b", "--profile"]).is_err());
        assert!(args(&["a", "b", "--verbose"]).is_err());
    }
}
