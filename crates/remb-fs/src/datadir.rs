use crate::config::{Config, load_config, save_config};
use remb_core::{RembError, RembResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment override for the data directory, checked after `--data-dir`.
pub const DATA_DIR_ENV: &str = "REMB_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub state_db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DataDirInit {
    pub paths: DataPaths,
    pub config: Config,
    pub created: Vec<PathBuf>,
}

impl DataPaths {
    pub fn from_root(root: PathBuf) -> Self {
        Self {
            config_path: root.join("config.toml"),
            state_db_path: root.join("state.db"),
            root,
        }
    }
}

/// Picks the data directory without touching the filesystem.
///
/// Precedence: explicit flag, then `REMB_DATA_DIR`, then the platform
/// data directory with a `remb` subfolder.
pub fn resolve_data_dir(explicit: Option<&Path>) -> RembResult<DataPaths> {
    if let Some(path) = explicit {
        return Ok(DataPaths::from_root(absolutize(path)?));
    }

    if let Ok(env_root) = std::env::var(DATA_DIR_ENV)
        && !env_root.trim().is_empty()
    {
        return Ok(DataPaths::from_root(absolutize(Path::new(&env_root))?));
    }

    let base = dirs::data_dir().ok_or_else(|| {
        RembError::io(format!(
            "no platform data directory available; pass --data-dir or set {DATA_DIR_ENV}"
        ))
    })?;
    Ok(DataPaths::from_root(base.join("remb")))
}

/// Resolves the data directory and makes it usable, creating the directory
/// and seeding `config.toml` on first run. Safe to call on every start.
pub fn init_data_dir(explicit: Option<&Path>) -> RembResult<DataDirInit> {
    let paths = resolve_data_dir(explicit)?;
    let mut created = Vec::new();

    ensure_dir(&paths.root, &mut created)?;

    let config = if paths.config_path.exists() {
        load_config(&paths)?
    } else {
        let config = Config::default();
        save_config(&paths, &config)?;
        created.push(paths.config_path.clone());
        config
    };

    Ok(DataDirInit {
        paths,
        config,
        created,
    })
}

fn absolutize(path: &Path) -> RembResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().map_err(|err| {
        RembError::io(format!(
            "failed to resolve current directory for path: {err}"
        ))
    })?;

    Ok(cwd.join(path))
}

fn ensure_dir(path: &Path, created: &mut Vec<PathBuf>) -> RembResult<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(RembError::io(format!(
                "expected '{}' to be a directory",
                path.display()
            )));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|err| {
        RembError::io(format!(
            "failed to create directory '{}': {}",
            path.display(),
            err
        ))
    })?;
    created.push(path.to_path_buf());
    Ok(())
}
