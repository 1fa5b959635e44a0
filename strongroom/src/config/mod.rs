//! Engine configuration loaded from `~/.strongroom/config.ini`.
//!
//! The module is split the same way the settings are used:
//! - [`settings`](self): pure data structs, one per `[section]`
//! - defaults: constants and the `Default` impls
//! - parser: the single place INI keys map to struct fields
//! - file: load/save and path handling
//! - size: human-readable size parsing for `[logs] max_total_size`

mod defaults;
mod file;
mod parser;
mod settings;
mod size;

pub use defaults::*;
pub use file::{config_file_path, ConfigFileError};
pub use settings::{
    Config, LogSettings, ProcessSettings, RetrySettings, SavePolicy, SchedulerSettings,
    StoreSettings, ToolSettings,
};
pub use size::{parse_size, SizeParseError};
