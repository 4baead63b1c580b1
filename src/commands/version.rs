//! Command: print version information.

/// Print the theme-engine version to stdout.
pub fn run() {
    let version = option_env!("THEME_ENGINE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    println!("theme-engine {version}");
}
