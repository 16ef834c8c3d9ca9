//! `astrolabe config`: configuration management commands.

use astrolabe_config::AppConfig;
use std::path::{Path, PathBuf};

use super::load_config;

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match load_config(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if config.agent.tool_timeout_secs == 0 {
                warnings.push("Tool timeout disabled (agent.tool_timeout_secs = 0)");
            }
            if config.agent.duplicates.min_fragment_chars == 0 {
                warnings.push("Every streamed fragment is checked for duplicates (min_fragment_chars = 0)");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Model:       {}", config.model);
            println!("   Language:    {}", config.language);
            println!(
                "   Turns:       {} tool / {} total",
                config.agent.max_tool_turns, config.agent.max_total_turns
            );
            println!("   Tool limit:  {}s", config.agent.tool_timeout_secs);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", config.to_toml());
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_path(path).display());
}

fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let explicit = Path::new("/tmp/astrolabe.toml");
        assert_eq!(config_path(Some(explicit)), explicit);
        assert!(config_path(None).ends_with(".astrolabe/config.toml"));
    }

    #[test]
    fn validate_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[agent]\nmax_tool_turns = 0\n").unwrap();
        assert!(validate(Some(&file)).is_err());
    }
}
