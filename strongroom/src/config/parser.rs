//! INI parsing logic for converting `Ini` → `Config`.
//!
//! This is the single place where INI key names are mapped to struct fields.
//! Parsing starts from `Config::default()` and overlays any values found in
//! the file, so a partial config is always valid.

use ini::Ini;
use std::path::PathBuf;
use std::time::Duration;

use super::file::ConfigFileError;
use super::settings::Config;
use super::size::parse_size;

/// Parses an `Ini` object into a `Config`.
pub(super) fn parse_ini(ini: &Ini) -> Result<Config, ConfigFileError> {
    let mut config = Config::default();

    // [tool] section
    if let Some(section) = ini.section(Some("tool")) {
        if let Some(v) = section.get("binary") {
            let v = v.trim();
            if !v.is_empty() {
                config.tool.binary = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("lock_wait_secs") {
            config.tool.lock_wait_secs = parse_u64("tool", "lock_wait_secs", v)?;
        }
    }

    // [process] section
    if let Some(section) = ini.section(Some("process")) {
        if let Some(v) = section.get("heartbeat_interval_secs") {
            let secs = parse_u64("process", "heartbeat_interval_secs", v)?;
            if secs == 0 {
                return Err(invalid("process", "heartbeat_interval_secs", v, "must be > 0"));
            }
            config.process.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(v) = section.get("termination_grace_secs") {
            config.process.termination_grace =
                Duration::from_secs(parse_u64("process", "termination_grace_secs", v)?);
        }
        if let Some(v) = section.get("progress_message_interval_secs") {
            config.process.progress_message_interval =
                Duration::from_secs(parse_u64("process", "progress_message_interval_secs", v)?);
        }
        if let Some(v) = section.get("max_concurrent_jobs") {
            config.process.max_concurrent_jobs =
                parse_u64("process", "max_concurrent_jobs", v)? as usize;
        }
    }

    // [retry] section
    if let Some(section) = ini.section(Some("retry")) {
        if let Some(v) = section.get("max_attempts") {
            let attempts = parse_u64("retry", "max_attempts", v)?;
            if attempts == 0 {
                return Err(invalid("retry", "max_attempts", v, "must be > 0"));
            }
            config.retry.max_attempts = attempts as u32;
        }
        if let Some(v) = section.get("base_delay_ms") {
            config.retry.base_delay =
                Duration::from_millis(parse_u64("retry", "base_delay_ms", v)?);
        }
    }

    // [logs] section
    if let Some(section) = ini.section(Some("logs")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logs.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("save_policy") {
            config.logs.save_policy = v.trim().parse().map_err(|_| {
                invalid(
                    "logs",
                    "save_policy",
                    v,
                    "must be one of: failed_only, failed_and_warnings, all_jobs",
                )
            })?;
        }
        if let Some(v) = section.get("buffer_lines") {
            let lines = parse_u64("logs", "buffer_lines", v)?;
            if lines == 0 {
                return Err(invalid("logs", "buffer_lines", v, "must be > 0"));
            }
            config.logs.buffer_lines = lines as usize;
        }
        if let Some(v) = section.get("max_age_days") {
            let days = parse_u64("logs", "max_age_days", v)?;
            // 0 disables the age pass.
            config.logs.max_age_days = (days > 0).then_some(days as u32);
        }
        if let Some(v) = section.get("max_total_size") {
            let bytes = parse_size(v).map_err(|_| {
                invalid(
                    "logs",
                    "max_total_size",
                    v,
                    "expected format like '100MB', '2GB' or a byte count (0 disables)",
                )
            })?;
            config.logs.max_total_size = (bytes > 0).then_some(bytes);
        }
    }

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("poll_interval_secs") {
            let secs = parse_u64("scheduler", "poll_interval_secs", v)?;
            if secs == 0 {
                return Err(invalid("scheduler", "poll_interval_secs", v, "must be > 0"));
            }
            config.scheduler.poll_interval = Duration::from_secs(secs);
        }
        if let Some(v) = section.get("stats_refresh_interval_secs") {
            config.scheduler.stats_refresh_interval_secs =
                parse_u64("scheduler", "stats_refresh_interval_secs", v)?;
        }
    }

    // [store] section
    if let Some(section) = ini.section(Some("store")) {
        if let Some(v) = section.get("path") {
            let v = v.trim();
            if !v.is_empty() {
                config.store.path = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("commit_interval_secs") {
            let secs = parse_u64("store", "commit_interval_secs", v)?;
            if secs == 0 {
                return Err(invalid("store", "commit_interval_secs", v, "must be > 0"));
            }
            config.store.commit_interval = Duration::from_secs(secs);
        }
    }

    Ok(config)
}

fn parse_u64(section: &str, key: &str, value: &str) -> Result<u64, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a non-negative integer"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expands a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
