//! Path resolution, ANSI stripping, and time formatting helpers.
use std::fs;
use std::path::PathBuf;

/// Application directory name under the XDG base directories.
pub const APP_DIR: &str = "theme-engine";

/// Strip ANSI escape sequences from a string.
///
/// Handles CSI sequences ending in any byte of the `@`..`~` range, so colour
/// and cursor codes are removed without consuming unrelated text.
pub(super) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if let Some(next) = chars.next()
                && next == '['
            {
                for inner in chars.by_ref() {
                    if ('@'..='~').contains(&inner) {
                        break;
                    }
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
}

/// `$XDG_CACHE_HOME/theme-engine` (default `~/.cache/theme-engine`).
///
/// The directory is not created.
#[must_use]
pub fn cache_dir() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map_or_else(|_| home_dir().join(".cache"), PathBuf::from)
        .join(APP_DIR)
}

/// `$XDG_CONFIG_HOME/theme-engine` (default `~/.config/theme-engine`).
#[must_use]
pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map_or_else(|_| home_dir().join(".config"), PathBuf::from)
        .join(APP_DIR)
}

/// Log file path for `command`, creating the cache directory if needed.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    let dir = cache_dir();
    fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("{command}.log")))
}

/// Current UTC time as `YYYY-MM-DD HH:MM:SS`.
pub(super) fn format_utc_datetime() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Current UTC time as `HH:MM:SS`.
pub(super) fn format_utc_time() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}
