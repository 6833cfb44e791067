mod config;
mod datadir;

pub use config::{
    Config, DEFAULT_LISTEN_TIMEOUT_SECS, DEFAULT_SITE_URL, DEFAULT_SLOT_LIMIT, MAX_SLOT_LIMIT,
    load_config, save_config,
};
pub use datadir::{DATA_DIR_ENV, DataDirInit, DataPaths, init_data_dir, resolve_data_dir};
