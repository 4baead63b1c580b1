//! Non-fatal checks of loaded configuration.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::TargetConfig;

/// A likely mistake found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Section the item came from (e.g. `targets`).
    pub source: String,
    /// The item that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a warning.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.source, self.item, self.message)
    }
}

/// A validator over one part of the configuration.
pub trait ConfigValidator {
    /// Every warning found.
    fn validate(&self) -> Vec<ValidationWarning>;

    /// Section this validator covers.
    fn name(&self) -> &'static str;
}

/// Checks `[[targets]]` entries.
#[derive(Debug)]
pub struct TargetValidator<'a> {
    targets: &'a [TargetConfig],
    template_dir: PathBuf,
}

impl<'a> TargetValidator<'a> {
    /// Validate `targets` with templates resolved against `template_dir`.
    #[must_use]
    pub fn new(targets: &'a [TargetConfig], template_dir: &Path) -> Self {
        Self {
            targets,
            template_dir: template_dir.to_path_buf(),
        }
    }
}

impl ConfigValidator for TargetValidator<'_> {
    fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        let source = self.name();

        for target in self.targets {
            let name = target.name.as_str();
            if name.trim().is_empty() {
                warnings.push(ValidationWarning::new(source, name, "target name is empty"));
            } else if !seen.insert(name) {
                warnings.push(ValidationWarning::new(
                    source,
                    name,
                    "duplicate target name; only the first is registered",
                ));
            }

            let template = self.template_dir.join(&target.template);
            if !template.is_file() {
                warnings.push(ValidationWarning::new(
                    source,
                    name,
                    format!("template does not exist: {}", template.display()),
                ));
            }

            let output = super::expand_home(&target.output);
            if output.is_relative() {
                warnings.push(ValidationWarning::new(
                    source,
                    name,
                    format!(
                        "output path should be absolute or start with ~: {}",
                        target.output.display()
                    ),
                ));
            }

            if target.reload.first().is_some_and(|p| p.trim().is_empty()) {
                warnings.push(ValidationWarning::new(
                    source,
                    name,
                    "reload command has an empty program",
                ));
            }
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "targets"
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::scheme::ColorFormat;

    fn target(name: &str, template: &str, output: &str) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            template: PathBuf::from(template),
            output: PathBuf::from(output),
            format: ColorFormat::Hex,
            requires: None,
            reload: Vec::new(),
        }
    }

    #[test]
    fn clean_config_has_no_warnings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kitty.conf"), "").unwrap();
        let targets = vec![target("kitty", "kitty.conf", "/tmp/kitty.conf")];
        assert!(TargetValidator::new(&targets, dir.path()).validate().is_empty());
    }

    #[test]
    fn reports_each_problem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kitty.conf"), "").unwrap();
        let mut bad_reload = target("gtk", "kitty.conf", "/tmp/gtk.css");
        bad_reload.reload = vec![String::new()];
        let targets = vec![
            target("kitty", "kitty.conf", "/tmp/kitty.conf"),
            target("kitty", "kitty.conf", "/tmp/other.conf"),
            target("btop", "missing.theme", "/tmp/btop.theme"),
            target("qt", "kitty.conf", "relative/qt.conf"),
            bad_reload,
        ];
        let messages: Vec<String> = TargetValidator::new(&targets, dir.path())
            .validate()
            .iter()
            .map(|w| format!("{}: {}", w.item, w.message.split(':').next().unwrap_or_default()))
            .collect();
        insta::assert_snapshot!(messages.join("\n"), @r"
        kitty: duplicate target name; only the first is registered
        btop: template does not exist
        qt: output path should be absolute or start with ~
        gtk: reload command has an empty program
        ");
    }

    #[test]
    fn warning_display() {
        let warning = ValidationWarning::new("targets", "kitty", "template does not exist");
        assert_eq!(warning.to_string(), "targets: kitty: template does not exist");
    }
}
