use crate::config::Config;
use anyhow::Result;
use std::fs;
use std::path::Path;

/// Makes sure the folder that will hold the collection exists.
pub fn setup_folders(config: &Config) -> Result<()> {
    let path = config.collection_path();
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => check_folder(parent),
        _ => Ok(()),
    }
}

/// Checks if a folder exists, creates it if not, or errors if a file with the same name exists.
fn check_folder(folder_path: &Path) -> Result<()> {
    if !folder_path.exists() {
        fs::create_dir_all(folder_path).map_err(|e| {
            anyhow::anyhow!("Error creating '{}' folder: {}", folder_path.display(), e)
        })?;
    } else if !folder_path.is_dir() {
        anyhow::bail!("Please remove the file named as {}", folder_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_parent_and_rejects_files() {
        let base = std::env::temp_dir().join(format!("catalog-sync-utils-{}", std::process::id()));
        let _ = fs::remove_dir_all(&base);

        let config = Config {
            collection_path: base.join("out").join("series.json").to_string_lossy().into_owned(),
            ..Config::default()
        };
        setup_folders(&config).unwrap();
        assert!(base.join("out").is_dir());

        fs::write(base.join("blocker"), "x").unwrap();
        let blocked = Config {
            collection_path: base.join("blocker").join("series.json").to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert!(setup_folders(&blocked).is_err());
    }
}
