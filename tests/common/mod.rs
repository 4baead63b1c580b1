// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed environment (config, templates,
// output files, backups) and a fluent builder so each integration test can
// describe its targets without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use theme_engine::config::EngineConfig;
use theme_engine::engine::Engine;
use theme_engine::handlers::HandlerRegistry;
use theme_engine::logging::{Log, TargetEntry, TargetStatus};
use theme_engine::scheme::{ColorScheme, Mode};

/// Complete, valid dark scheme.
pub fn sample_scheme() -> ColorScheme {
    let palette = [
        "#1d1f21", "#cc6666", "#b5bd68", "#f0c674", "#81a2be", "#b294bb", "#8abeb7", "#c5c8c6",
        "#969896", "#cc6666", "#b5bd68", "#f0c674", "#81a2be", "#b294bb", "#8abeb7", "#ffffff",
    ];
    let mut scheme = ColorScheme::new("tomorrow-night", Mode::Dark)
        .with_color("background", "#1d1f21")
        .with_color("foreground", "#c5c8c6");
    for (i, value) in palette.iter().enumerate() {
        scheme = scheme.with_color(format!("colour{i}"), *value);
    }
    scheme
}

/// [`Log`] that keeps every message and target result in memory.
#[derive(Debug, Default)]
pub struct CollectingLog {
    lines: Mutex<Vec<String>>,
    targets: Mutex<Vec<TargetEntry>>,
}

impl CollectingLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn targets(&self) -> Vec<TargetEntry> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status_of(&self, name: &str) -> Option<TargetStatus> {
        self.targets()
            .into_iter()
            .rev()
            .find(|t| t.name == name)
            .map(|t| t.status)
    }

    fn push(&self, kind: &str, msg: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{kind}: {msg}"));
    }
}

impl Log for CollectingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn dry_run(&self, msg: &str) {
        self.push("dry_run", msg);
    }
    fn record_target(&self, name: &str, status: TargetStatus, message: Option<&str>) {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TargetEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
    }
}

/// An isolated environment backed by a [`tempfile::TempDir`].
///
/// Layout: `config.toml`, `templates/`, `out/` (target outputs) and
/// `backups/`. Everything is deleted when dropped.
pub struct IntegrationTestContext {
    /// Temporary root directory.
    pub root: tempfile::TempDir,
    /// Log shared with every engine built by this context.
    pub log: Arc<CollectingLog>,
}

impl IntegrationTestContext {
    /// Path to the root directory.
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Path of the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("config.toml")
    }

    /// Path of a target output file.
    pub fn output(&self, file: &str) -> PathBuf {
        self.root.path().join("out").join(file)
    }

    /// Read a target output file.
    pub fn read_output(&self, file: &str) -> String {
        std::fs::read_to_string(self.output(file)).expect("read output")
    }

    /// Load the context's config file.
    pub fn load_config(&self) -> EngineConfig {
        EngineConfig::load(&self.config_path()).expect("load config")
    }

    /// Build a fresh engine from the config file.
    pub fn engine(&self) -> Engine {
        let config = self.load_config();
        let registry = HandlerRegistry::new();
        config.register_targets(&registry).expect("register targets");
        Engine::from_config(&config, Arc::new(registry))
            .with_log(Arc::clone(&self.log) as Arc<dyn Log>)
    }
}

/// Fluent builder for [`IntegrationTestContext`].
pub struct TestContextBuilder {
    root: tempfile::TempDir,
    sections: String,
    targets: String,
}

impl TestContextBuilder {
    /// Begin with backups under the temp root and an in-memory cache.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(root.path().join("templates")).expect("create templates dir");
        std::fs::create_dir_all(root.path().join("out")).expect("create out dir");
        Self {
            root,
            sections: String::new(),
            targets: String::new(),
        }
    }

    /// Add a `[[targets]]` entry rendering `template` into `out/<name>.conf`.
    pub fn with_target(self, name: &str, template: &str) -> Self {
        self.with_target_extra(name, template, "")
    }

    /// Like [`with_target`](Self::with_target) with extra TOML lines for
    /// the entry (`format`, `requires`, `reload`).
    pub fn with_target_extra(mut self, name: &str, template: &str, extra: &str) -> Self {
        let file = format!("{name}.tmpl");
        std::fs::write(self.root.path().join("templates").join(&file), template)
            .expect("write template");
        let output = self.root.path().join("out").join(format!("{name}.conf"));
        self.targets.push_str(&format!(
            "\n[[targets]]\nname = \"{name}\"\ntemplate = \"{file}\"\noutput = {output:?}\n{extra}\n",
            output = output.display().to_string(),
        ));
        self
    }

    /// Add a `[[targets]]` entry whose template file does not exist.
    pub fn with_missing_template(mut self, name: &str) -> Self {
        let output = self.root.path().join("out").join(format!("{name}.conf"));
        self.targets.push_str(&format!(
            "\n[[targets]]\nname = \"{name}\"\ntemplate = \"missing.tmpl\"\noutput = {output:?}\n",
            output = output.display().to_string(),
        ));
        self
    }

    /// Append raw TOML (sections such as `[cache]`) to the config.
    pub fn with_config(mut self, toml: &str) -> Self {
        self.sections.push_str(toml);
        self.sections.push('\n');
        self
    }

    /// Persist the render cache under `<root>/render-cache`.
    pub fn with_persistent_cache(self) -> Self {
        let dir = self.root.path().join("render-cache");
        let toml = format!(
            "[cache]\npersist = true\ndir = {:?}\n",
            dir.display().to_string()
        );
        self.with_config(&toml)
    }

    /// Pre-populate `out/<file>` with `contents`.
    pub fn with_existing_output(self, file: &str, contents: &str) -> Self {
        std::fs::write(self.root.path().join("out").join(file), contents)
            .expect("write existing output");
        self
    }

    /// Write `config.toml` and return the finished context.
    pub fn build(self) -> IntegrationTestContext {
        let backups = self.root.path().join("backups");
        let config = format!(
            "template_dir = \"templates\"\n\n[backup]\ndir = {backups:?}\n\n{}{}",
            self.sections,
            self.targets,
            backups = backups.display().to_string(),
        );
        std::fs::write(self.root.path().join("config.toml"), config).expect("write config");
        IntegrationTestContext {
            root: self.root,
            log: Arc::new(CollectingLog::default()),
        }
    }
}
