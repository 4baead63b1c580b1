//! Generic handler that renders a `{{ key }}` template into one file.

use anyhow::{Context as _, Result, bail};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ApplicationHandler;
use crate::config::TargetConfig;
use crate::engine::TargetContext;
use crate::exec::{Executor, SystemExecutor};
use crate::scheme::{ColorFormat, ColorMap};

/// A handler defined by a `[[targets]]` config entry.
///
/// Placeholders are `{{ key }}` with `key` made of ASCII letters, digits and
/// `_`; anything else between braces is copied through untouched. A
/// placeholder whose key is absent from the color map is an error.
#[derive(Debug, Clone)]
pub struct TemplateHandler {
    name: String,
    template_file: PathBuf,
    template: String,
    output: PathBuf,
    format: ColorFormat,
    requires: Option<String>,
    reload: Vec<String>,
    executor: Arc<dyn Executor>,
}

impl TemplateHandler {
    /// Build a handler from an in-memory template.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        output: impl Into<PathBuf>,
        format: ColorFormat,
    ) -> Self {
        Self {
            name: name.into(),
            template_file: PathBuf::new(),
            template: template.into(),
            output: output.into(),
            format,
            requires: None,
            reload: Vec::new(),
            executor: Arc::new(SystemExecutor),
        }
    }

    /// Load the handler for `target`, reading its template from `template_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template file cannot be read.
    pub fn from_config(target: &TargetConfig, template_dir: &Path) -> Result<Self> {
        let path = template_dir.join(&target.template);
        let template = std::fs::read_to_string(&path)
            .with_context(|| format!("reading template {}", path.display()))?;
        Ok(Self {
            name: target.name.clone(),
            template_file: target.template.clone(),
            template,
            output: crate::config::expand_home(&target.output),
            format: target.format,
            requires: target.requires.clone(),
            reload: target.reload.clone(),
            executor: Arc::new(SystemExecutor),
        })
    }

    /// Builder-style setter for the program that must be on `PATH`.
    #[must_use]
    pub fn with_requires(mut self, program: impl Into<String>) -> Self {
        self.requires = Some(program.into());
        self
    }

    /// Builder-style setter for the command run after the file is written.
    #[must_use]
    pub fn with_reload(mut self, command: Vec<String>) -> Self {
        self.reload = command;
        self
    }

    /// Builder-style setter for the executor used to look up `requires`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Substitute every placeholder in the loaded template.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first placeholder missing from `colors`.
    pub fn render(&self, colors: &ColorMap) -> Result<String> {
        render_template(&self.name, &self.template, colors)
    }

    /// Template text to use, preferring a same-named file in `override_dir`.
    fn template_source(&self, override_dir: Option<&Path>) -> Result<Cow<'_, str>> {
        match override_dir {
            Some(dir) if !self.template_file.as_os_str().is_empty() => {
                let path = dir.join(&self.template_file);
                if path.exists() {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading template {}", path.display()))?;
                    return Ok(Cow::Owned(text));
                }
                Ok(Cow::Borrowed(&self.template))
            }
            _ => Ok(Cow::Borrowed(&self.template)),
        }
    }
}

impl ApplicationHandler for TemplateHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, colors: &ColorMap, ctx: &mut TargetContext<'_>) -> Result<()> {
        let override_dir = ctx.template_dir().map(Path::to_path_buf);
        let rendered = ctx.render_cached(|| {
            let template = self.template_source(override_dir.as_deref())?;
            render_template(&self.name, &template, colors).map(String::into_bytes)
        })?;
        ctx.write_file(&self.output, rendered);
        if let Some((program, args)) = self.reload.split_first() {
            ctx.run_command(program, args);
        }
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.requires
            .as_deref()
            .is_none_or(|program| self.executor.which(program))
    }

    fn required_colors(&self) -> Vec<String> {
        placeholders(&self.template)
    }

    fn output_path(&self) -> PathBuf {
        self.output.clone()
    }

    fn color_format(&self) -> ColorFormat {
        self.format
    }

    fn render_fingerprint(&self, template_dir: Option<&Path>) -> Option<Vec<u8>> {
        self.template_source(template_dir)
            .ok()
            .map(|text| text.into_owned().into_bytes())
    }
}

fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Distinct placeholder keys in order of first appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some((_, after)) = rest.split_once("{{") {
        let Some((inner, tail)) = after.split_once("}}") else {
            break;
        };
        let key = inner.trim();
        if is_key(key) && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        rest = tail;
    }
    keys
}

fn render_template(name: &str, template: &str, colors: &ColorMap) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((literal, after)) = rest.split_once("{{") {
        out.push_str(literal);
        let Some((inner, tail)) = after.split_once("}}") else {
            out.push_str("{{");
            out.push_str(after);
            return Ok(out);
        };
        let key = inner.trim();
        if is_key(key) {
            let Some(value) = colors.get(key) else {
                bail!("template for '{name}' uses unknown color '{{{{ {key} }}}}'");
            };
            out.push_str(value);
        } else {
            out.push_str("{{");
            out.push_str(inner);
            out.push_str("}}");
        }
        rest = tail;
    }
    out.push_str(rest);
    Ok(out)
}
