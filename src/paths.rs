// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Config-directory bootstrap: `~/.config/midimacs/` with `config.toml`
//! and a `macros/` directory, created on first run.

use anyhow::Context;
use log::info;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub macro_dir: PathBuf,
}

/// With an explicit config file, the macro dir sits beside it; otherwise
/// everything lives under the per-user config directory.
pub fn bootstrap(config_file: Option<&Path>) -> anyhow::Result<AppPaths> {
    let (config_file, macro_dir) = match config_file {
        Some(file) => {
            let parent = file.parent().unwrap_or_else(|| Path::new("."));
            (file.to_path_buf(), parent.join("macros"))
        }
        None => {
            let config_dir = dirs::config_dir()
                .context("no per-user config directory on this system")?
                .join("midimacs");
            ensure_directory(&config_dir)?;
            (config_dir.join("config.toml"), config_dir.join("macros"))
        }
    };
    ensure_directory(&macro_dir)?;
    if !config_file.exists() {
        info!(
            "config file {} does not exist, creating it now",
            config_file.display()
        );
        std::fs::write(&config_file, "")
            .with_context(|| format!("creating {}", config_file.display()))?;
    } else if config_file.is_dir() {
        anyhow::bail!(
            "config file {} already exists as a directory",
            config_file.display()
        );
    }
    Ok(AppPaths {
        config_file,
        macro_dir,
    })
}

fn ensure_directory(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} already exists as a file", path.display());
        }
        return Ok(());
    }
    info!("directory {} does not exist, creating it now", path.display());
    std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_bootstraps_beside_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("my-config.toml");
        let paths = bootstrap(Some(&config)).unwrap();
        assert_eq!(paths.config_file, config);
        assert!(config.exists());
        assert!(paths.macro_dir.is_dir());
    }

    #[test]
    fn a_directory_where_the_config_should_be_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::create_dir(&config).unwrap();
        assert!(bootstrap(Some(&config)).is_err());
    }

    #[test]
    fn a_file_where_the_macro_dir_should_be_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("macros"), "oops").unwrap();
        let config = dir.path().join("config.toml");
        assert!(bootstrap(Some(&config)).is_err());
    }
}
