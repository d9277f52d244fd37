use std::path::Path;

use anyhow::Result;
use ideacat_config::Config;

pub fn handle(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(&path)?;

    println!("✓ Wrote default config to {}", path.display());
    println!("  Set OPENAI_API_KEY, then run 'ideacat categorize <ideas.json>'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        handle(Some(&path), false).unwrap();
        assert!(Config::load(Some(&path)).unwrap().validate().is_ok());

        assert!(handle(Some(&path), false).is_err());
        assert!(handle(Some(&path), true).is_ok());
    }
}
