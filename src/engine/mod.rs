//! The theme engine: validate, dispatch, cache, back up and commit.
//!
//! [`Engine::apply_theme`] is all-or-nothing: every target renders first,
//! and only if all succeed are the staged operations executed, inside a
//! [`Transaction`] by default. [`Engine::apply_all_themes`] is best-effort:
//! each target is written as soon as it renders and failures are only
//! reported.

mod cancel;
mod context;
mod dispatch;
mod semaphore;

pub use cancel::CancellationToken;
pub use context::{StagedTarget, TargetContext};
pub use dispatch::{
    DEFAULT_SLOW_THRESHOLD, DEFAULT_WORKER_POOL, DispatchSettings, TargetOutcome, apply_parallel,
    apply_sequential,
};
pub use semaphore::{Permit, Semaphore};

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, ConversionCache, hash_hex, target_key};
use crate::config::EngineConfig;
use crate::error::{EngineError, RegistryError, TargetError, TargetFailure, ValidationError};
use crate::exec::{Executor, SystemExecutor};
use crate::fs::{FileSystemOps, SystemFileSystemOps};
use crate::handlers::{ApplicationHandler, HandlerFactory, HandlerRegistry};
use crate::logging::{BufferedLog, Log, Logger, TargetStatus};
use crate::scheme::{ColorFormat, ColorMap, ColorScheme, map_colors, validate_scheme};
use crate::transaction::{Batch, BackupManager, BackupManifest, Operation, Transaction};

/// Per-call options for [`Engine::apply_theme`] and [`Engine::apply_all_themes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Targets to apply; empty means every registered target.
    pub applications: Vec<String>,
    /// Render and report, but execute nothing.
    pub dry_run: bool,
    /// Ignore cached renders and rewrite files even if unchanged.
    pub force: bool,
    /// Dispatch targets concurrently.
    pub parallel: bool,
    /// Directory whose templates take precedence over the configured ones.
    pub template_dir: Option<PathBuf>,
    /// Verbose output.
    pub verbose: bool,
    /// Skip the pre-apply backup.
    pub no_backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            applications: Vec::new(),
            dry_run: false,
            force: false,
            parallel: true,
            template_dir: None,
            verbose: false,
            no_backup: false,
        }
    }
}

/// Outcome of one target in an [`ApplyReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    /// Target name.
    pub name: String,
    /// Final status.
    pub status: TargetStatus,
    /// Skip reason, error, or dry-run detail.
    pub message: Option<String>,
    /// Whether the render came from the cache.
    pub cache_hit: bool,
    /// Whether any file or command was actually changed or run.
    pub changed: bool,
}

impl TargetReport {
    fn new(name: impl Into<String>, status: TargetStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            cache_hit: false,
            changed: false,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn failed(name: impl Into<String>, error: &TargetError) -> Self {
        let status = if matches!(error, TargetError::Cancelled) {
            TargetStatus::Cancelled
        } else {
            TargetStatus::Failed
        };
        Self::new(name, status).with_message(error.to_string())
    }
}

/// Per-target results of an apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// One entry per target, in target order.
    pub targets: Vec<TargetReport>,
    /// Id of the backup taken before applying, if any.
    pub backup_id: Option<String>,
}

impl ApplyReport {
    /// Targets that failed or were cancelled.
    #[must_use]
    pub fn failed(&self) -> Vec<&TargetReport> {
        self.targets
            .iter()
            .filter(|t| matches!(t.status, TargetStatus::Failed | TargetStatus::Cancelled))
            .collect()
    }

    /// Whether no target failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Number of targets with `status`.
    #[must_use]
    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    /// Number of renders served from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.targets.iter().filter(|t| t.cache_hit).count()
    }

    /// One-line summary, e.g. `3 targets: 2 applied, 1 not installed, 0 failed`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} applied", self.count(TargetStatus::Applied))];
        for status in [
            TargetStatus::DryRun,
            TargetStatus::NotInstalled,
            TargetStatus::Cancelled,
        ] {
            let n = self.count(status);
            if n > 0 {
                parts.push(format!("{n} {status}"));
            }
        }
        parts.push(format!("{} failed", self.count(TargetStatus::Failed)));
        let hits = self.cache_hits();
        let cached = if hits > 0 {
            format!(" ({hits} cached)")
        } else {
            String::new()
        };
        format!("{} targets: {}{cached}", self.targets.len(), parts.join(", "))
    }
}

/// Applies color schemes to registered targets.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    cache: Option<Arc<CacheStore<Vec<u8>>>>,
    converter: Arc<ConversionCache>,
    backups: Option<Arc<BackupManager>>,
    fs: Arc<dyn FileSystemOps>,
    executor: Arc<dyn Executor>,
    log: Arc<dyn Log>,
    settings: DispatchSettings,
    transactional: bool,
}

impl Engine {
    /// Create an engine over `registry` with no cache, no backups and a
    /// transactional commit.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            cache: None,
            converter: Arc::new(ConversionCache::default()),
            backups: None,
            fs: Arc::new(SystemFileSystemOps),
            executor: Arc::new(SystemExecutor),
            log: Arc::new(Logger::new("theme-engine")),
            settings: DispatchSettings::default(),
            transactional: true,
        }
    }

    /// Build an engine from loaded configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig, registry: Arc<HandlerRegistry>) -> Self {
        let mut engine = Self::new(registry)
            .with_converter(Arc::new(ConversionCache::new(config.cache.conversion_entries)))
            .with_worker_pool(config.engine.worker_pool)
            .with_slow_apply_threshold(config.slow_apply_threshold())
            .transactional(config.engine.transactional);
        if config.cache.enabled {
            engine = engine.with_cache(Arc::new(CacheStore::new(config.cache_options())));
        }
        if config.backup.enabled {
            engine = engine.with_backups(Arc::new(BackupManager::new(
                config.backup_dir(),
                config.backup.retention,
            )));
        }
        engine
    }

    /// Cache rendered output in `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CacheStore<Vec<u8>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use `converter` for color format conversion.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<ConversionCache>) -> Self {
        self.converter = converter;
        self
    }

    /// Back up output files through `backups` before applying.
    #[must_use]
    pub fn with_backups(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Filesystem used by staged file writes.
    #[must_use]
    pub fn with_fs_ops(mut self, fs: Arc<dyn FileSystemOps>) -> Self {
        self.fs = fs;
        self
    }

    /// Executor used by staged commands.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Log sink for progress and per-target results.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    /// Maximum targets dispatched concurrently.
    #[must_use]
    pub const fn with_worker_pool(mut self, workers: usize) -> Self {
        self.settings.worker_pool = workers;
        self
    }

    /// Warn when a single target takes longer than `threshold`.
    #[must_use]
    pub const fn with_slow_apply_threshold(mut self, threshold: Duration) -> Self {
        self.settings.slow_threshold = threshold;
        self
    }

    /// Commit all targets as one transaction (`true`, the default) or
    /// execute each target's operations directly.
    #[must_use]
    pub const fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    /// The handler registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The render cache, if enabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&Arc<CacheStore<Vec<u8>>>> {
        self.cache.as_ref()
    }

    /// The backup manager, if enabled.
    #[must_use]
    pub const fn backups(&self) -> Option<&Arc<BackupManager>> {
        self.backups.as_ref()
    }

    /// Check a scheme without touching anything.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] describing the first problem.
    pub fn validate_theme(&self, scheme: &ColorScheme) -> Result<(), EngineError> {
        validate_scheme(scheme)?;
        Ok(())
    }

    /// Registered target names, sorted.
    #[must_use]
    pub fn supported_applications(&self) -> Vec<String> {
        self.registry.supported_applications()
    }

    /// Register an already-built handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `name` is taken.
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationHandler>,
    ) -> Result<(), RegistryError> {
        self.registry.register_handler(name, handler)
    }

    /// Register a handler built on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `name` is taken.
    pub fn register_lazy_handler(
        &self,
        name: impl Into<String>,
        factory: HandlerFactory,
    ) -> Result<(), RegistryError> {
        self.registry.register_lazy_handler(name, factory)
    }

    /// Apply `scheme` to the requested targets, all or nothing.
    ///
    /// Every target renders first. If any fails (or is cancelled) nothing is
    /// executed and the pre-apply backup is restored, file modes included.
    /// Otherwise the staged operations run, inside one transaction when
    /// transactional.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] if the scheme is invalid (before any I/O).
    /// - [`EngineError::UnknownApplication`] for an unregistered explicit target.
    /// - [`EngineError::TargetsFailed`] naming every target that failed to render.
    /// - [`EngineError::Transaction`] if execution failed and was rolled back.
    /// - [`EngineError::Operation`] if a non-transactional target failed to execute.
    pub fn apply_theme(
        &self,
        cancel: &CancellationToken,
        scheme: &ColorScheme,
        options: &ApplyOptions,
    ) -> Result<ApplyReport, EngineError> {
        validate_scheme(scheme)?;
        let targets = self.resolve_targets(options)?;
        self.log.stage(&format!(
            "Applying '{}' ({}) to {} target(s)",
            scheme.name,
            scheme.mode,
            targets.len()
        ));

        let backup = self.backup_outputs(&targets, options);
        let outcomes = self.dispatch(cancel, &targets, options, |name, log| {
            self.stage_target(name, scheme, options, log)
        });

        let mut failures = Vec::new();
        let mut staged = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(target) => staged.push((outcome.target, target)),
                Err(error) => failures.push(TargetFailure {
                    target: outcome.target,
                    error,
                }),
            }
        }
        if !failures.is_empty() {
            for failure in &failures {
                self.log
                    .error(&format!("{}: {}", failure.target, failure.error));
                self.record(&TargetReport::failed(&failure.target, &failure.error));
            }
            self.restore(backup.as_ref());
            return Err(EngineError::TargetsFailed(failures));
        }

        let mut report = ApplyReport {
            targets: Vec::new(),
            backup_id: backup.as_ref().map(|m| m.id.clone()),
        };
        if options.dry_run {
            for (name, target) in staged {
                let entry = match target {
                    Some(target) => self.report_dry_run(&name, &target, self.log.as_ref()),
                    None => not_installed(&name),
                };
                report.targets.push(entry);
            }
        } else if self.transactional {
            report.targets = self.commit_transaction(staged, backup, options)?;
        } else {
            report.targets = self.commit_direct(staged, backup.as_ref())?;
        }

        for entry in &report.targets {
            self.record(entry);
        }
        self.log.info(&report.summary());
        Ok(report)
    }

    /// Apply `scheme` to the requested targets, best-effort.
    ///
    /// Each target's operations run as soon as it renders; a failing target
    /// is reported and the rest carry on. Nothing is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the scheme is invalid. Target
    /// failures, including unknown applications, appear in the report.
    pub fn apply_all_themes(
        &self,
        cancel: &CancellationToken,
        scheme: &ColorScheme,
        options: &ApplyOptions,
    ) -> Result<ApplyReport, EngineError> {
        validate_scheme(scheme)?;
        let (targets, unknown): (Vec<String>, Vec<String>) = if options.applications.is_empty() {
            (self.registry.names(), Vec::new())
        } else {
            dedup(&options.applications)
                .into_iter()
                .partition(|name| self.registry.contains(name))
        };
        self.log.stage(&format!(
            "Applying '{}' ({}) to {} target(s), best effort",
            scheme.name,
            scheme.mode,
            targets.len()
        ));

        let backup = self.backup_outputs(&targets, options);
        let outcomes = self.dispatch(cancel, &targets, options, |name, log| {
            let Some(target) = self.stage_target(name, scheme, options, log)? else {
                return Ok(not_installed(name));
            };
            if options.dry_run {
                return Ok(self.report_dry_run(name, &target, log));
            }
            let mut batch = Operation::Batch(Batch::new(name, target.operations));
            batch.execute().map_err(TargetError::Failed)?;
            Ok(TargetReport {
                cache_hit: target.cache_hit,
                changed: batch.changed(),
                ..TargetReport::new(name, TargetStatus::Applied)
            })
        });

        let mut report = ApplyReport {
            targets: Vec::new(),
            backup_id: backup.as_ref().map(|m| m.id.clone()),
        };
        for outcome in outcomes {
            let entry = match outcome.result {
                Ok(entry) => entry,
                Err(error) => {
                    self.log.error(&format!("{}: {error}", outcome.target));
                    TargetReport::failed(outcome.target, &error)
                }
            };
            report.targets.push(entry);
        }
        for name in unknown {
            self.log.error(&format!("{name}: no handler registered"));
            report
                .targets
                .push(TargetReport::new(name, TargetStatus::Failed).with_message("no handler registered"));
        }

        for entry in &report.targets {
            self.record(entry);
        }
        self.log.info(&report.summary());
        Ok(report)
    }

    /// Explicit targets (deduplicated, all registered) or every target.
    fn resolve_targets(&self, options: &ApplyOptions) -> Result<Vec<String>, EngineError> {
        if options.applications.is_empty() {
            return Ok(self.registry.names());
        }
        let targets = dedup(&options.applications);
        if let Some(unknown) = targets.iter().find(|name| !self.registry.contains(name)) {
            return Err(EngineError::UnknownApplication(unknown.clone()));
        }
        Ok(targets)
    }

    /// Snapshot every installed target's output file. Failure costs only
    /// the safety net, so it is a warning.
    fn backup_outputs(&self, targets: &[String], options: &ApplyOptions) -> Option<BackupManifest> {
        if options.no_backup || options.dry_run {
            return None;
        }
        let manager = self.backups.as_ref()?;
        let paths: Vec<PathBuf> = targets
            .par_iter()
            .filter_map(|name| self.registry.get_handler(name).ok())
            .filter(|handler| handler.is_installed())
            .map(|handler| handler.output_path())
            .collect();
        if paths.is_empty() {
            return None;
        }
        match manager.create(&paths) {
            Ok(manifest) => {
                self.log.debug(&format!(
                    "backed up {} file(s) as {}",
                    manifest.files.len(),
                    manifest.id
                ));
                Some(manifest)
            }
            Err(e) => {
                self.log
                    .warn(&format!("backup failed, continuing without it: {e}"));
                None
            }
        }
    }

    fn restore(&self, manifest: Option<&BackupManifest>) {
        let (Some(manager), Some(manifest)) = (self.backups.as_ref(), manifest) else {
            return;
        };
        match manager.restore(manifest) {
            Ok(()) => self.log.info(&format!("restored backup {}", manifest.id)),
            Err(e) => self.log.error(&format!(
                "restoring backup {} failed, manual intervention required: {e}",
                manifest.id
            )),
        }
    }

    /// Run `f` for every target with a per-target buffered log, then flush
    /// the buffers in target order.
    fn dispatch<T, F>(
        &self,
        cancel: &CancellationToken,
        targets: &[String],
        options: &ApplyOptions,
        f: F,
    ) -> Vec<TargetOutcome<T>>
    where
        T: Send,
        F: Fn(&str, &dyn Log) -> Result<T, TargetError> + Sync,
    {
        let buffers: HashMap<&str, BufferedLog> = targets
            .iter()
            .map(|name| (name.as_str(), BufferedLog::new(Arc::clone(&self.log))))
            .collect();
        let run = |name: &str| {
            let log = buffers
                .get(name)
                .map_or(self.log.as_ref(), |buffer| buffer as &dyn Log);
            f(name, log)
        };
        let outcomes = if options.parallel {
            apply_parallel(cancel, targets, &self.settings, run)
        } else {
            apply_sequential(cancel, targets, &self.settings, run)
        };
        for name in targets {
            if let Some(buffer) = buffers.get(name.as_str()) {
                buffer.flush();
            }
        }
        outcomes
    }

    /// Map, convert, validate and render one target. `None` means the
    /// application is not installed.
    fn stage_target(
        &self,
        name: &str,
        scheme: &ColorScheme,
        options: &ApplyOptions,
        log: &dyn Log,
    ) -> Result<Option<StagedTarget>, TargetError> {
        let handler = self.registry.get_handler(name)?;
        if !handler.is_installed() {
            log.info(&format!("{name}: not installed, skipping"));
            return Ok(None);
        }
        let colors = self.convert_colors(&map_colors(scheme, name), handler.color_format())?;
        handler.validate(&colors).map_err(TargetError::Rejected)?;

        let mut key = target_key(name, scheme.mode, &colors);
        if let Some(dir) = &options.template_dir {
            key.push(':');
            key.push_str(&hash_hex(dir.as_os_str().as_encoded_bytes()));
        }
        if let Some(fingerprint) = handler.render_fingerprint(options.template_dir.as_deref()) {
            key.push(':');
            key.push_str(&hash_hex(&fingerprint));
        }
        let mut ctx = TargetContext::new(
            name,
            key,
            self.cache.as_deref(),
            options,
            log,
            &self.fs,
            &self.executor,
        );
        handler.apply(&colors, &mut ctx).map_err(TargetError::Failed)?;
        let staged = ctx.finish();
        log.debug(&format!(
            "{name}: staged {} operation(s){}",
            staged.operations.len(),
            if staged.cache_hit { " from cache" } else { "" }
        ));
        Ok(Some(staged))
    }

    fn convert_colors(
        &self,
        colors: &ColorMap,
        format: ColorFormat,
    ) -> Result<ColorMap, ValidationError> {
        colors
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.converter.convert(value, format)?)))
            .collect()
    }

    fn report_dry_run(&self, name: &str, target: &StagedTarget, log: &dyn Log) -> TargetReport {
        for op in &target.operations {
            log.dry_run(&format!("would {}", op.description()));
        }
        TargetReport {
            cache_hit: target.cache_hit,
            ..TargetReport::new(name, TargetStatus::DryRun)
                .with_message(format!("{} operation(s)", target.operations.len()))
        }
    }

    /// Execute every staged target as one transaction.
    fn commit_transaction(
        &self,
        staged: Vec<(String, Option<StagedTarget>)>,
        backup: Option<BackupManifest>,
        options: &ApplyOptions,
    ) -> Result<Vec<TargetReport>, EngineError> {
        let mut tx = Transaction::new();
        if !options.no_backup
            && let Some(manager) = &self.backups
        {
            tx = tx.with_backup_manager(Arc::clone(manager));
            if let Some(manifest) = backup {
                tx = tx.with_snapshot(manifest);
            }
        }

        let mut slots = Vec::with_capacity(staged.len());
        for (name, target) in staged {
            let cache_hit = target.map(|target| {
                tx.add_operation(Operation::Batch(Batch::new(name.clone(), target.operations)));
                target.cache_hit
            });
            slots.push((name, cache_hit));
        }
        self.log.debug(&format!(
            "committing {} target(s) as one transaction",
            tx.operation_count()
        ));

        if let Err(e) = tx.execute() {
            self.log.error(&e.to_string());
            for (name, cache_hit) in &slots {
                if cache_hit.is_some() {
                    self.record(
                        &TargetReport::new(name, TargetStatus::Failed).with_message("rolled back"),
                    );
                }
            }
            return Err(EngineError::Transaction(e));
        }

        let mut operations = tx.into_operations().into_iter();
        Ok(slots
            .into_iter()
            .map(|(name, cache_hit)| match cache_hit {
                Some(cache_hit) => TargetReport {
                    cache_hit,
                    changed: operations.next().is_some_and(|op| op.changed()),
                    ..TargetReport::new(name, TargetStatus::Applied)
                },
                None => not_installed(&name),
            })
            .collect())
    }

    /// Execute each target's operations directly. The first failure undoes
    /// the targets already executed, newest first, then restores the backup.
    fn commit_direct(
        &self,
        staged: Vec<(String, Option<StagedTarget>)>,
        backup: Option<&BackupManifest>,
    ) -> Result<Vec<TargetReport>, EngineError> {
        let mut reports = Vec::with_capacity(staged.len());
        let mut executed: Vec<(String, Operation)> = Vec::new();
        for (name, target) in staged {
            let Some(target) = target else {
                reports.push(not_installed(&name));
                continue;
            };
            let mut batch = Operation::Batch(Batch::new(name.clone(), target.operations));
            if let Err(cause) = batch.execute() {
                self.log.error(&format!("{name}: {cause:#}"));
                self.record(
                    &TargetReport::new(&name, TargetStatus::Failed).with_message(format!("{cause:#}")),
                );
                self.undo(&mut executed);
                self.restore(backup);
                return Err(EngineError::Operation {
                    target: name,
                    cause,
                });
            }
            reports.push(TargetReport {
                cache_hit: target.cache_hit,
                changed: batch.changed(),
                ..TargetReport::new(&name, TargetStatus::Applied)
            });
            executed.push((name, batch));
        }
        Ok(reports)
    }

    /// Roll back executed targets in reverse order.
    fn undo(&self, executed: &mut [(String, Operation)]) {
        for (name, batch) in executed.iter_mut().rev() {
            match batch.rollback() {
                Ok(()) => self.record(
                    &TargetReport::new(name.as_str(), TargetStatus::Failed).with_message("rolled back"),
                ),
                Err(e) => self.log.error(&format!(
                    "{name}: rollback failed, manual intervention required: {e:#}"
                )),
            }
        }
    }

    fn record(&self, entry: &TargetReport) {
        self.log
            .record_target(&entry.name, entry.status, entry.message.as_deref());
    }
}

fn not_installed(name: &str) -> TargetReport {
    TargetReport::new(name, TargetStatus::NotInstalled).with_message("not installed")
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::fs::FaultyFileSystemOps;
    use crate::logging::RecordingLog;
    use crate::scheme::tests::sample_scheme;
    use anyhow::bail;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes `bg=<background>` to its output, or fails on demand.
    #[derive(Debug)]
    struct StubHandler {
        name: String,
        output: PathBuf,
        fail: bool,
        installed: bool,
        renders: AtomicUsize,
    }

    impl StubHandler {
        fn new(name: &str, output: &Path) -> Self {
            Self {
                name: name.to_string(),
                output: output.to_path_buf(),
                fail: false,
                installed: true,
                renders: AtomicUsize::new(0),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn not_installed(mut self) -> Self {
            self.installed = false;
            self
        }
    }

    impl ApplicationHandler for StubHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn apply(&self, colors: &ColorMap, ctx: &mut TargetContext<'_>) -> anyhow::Result<()> {
            if self.fail {
                bail!("{} exploded", self.name);
            }
            let bytes = ctx.render_cached(|| {
                self.renders.fetch_add(1, Ordering::SeqCst);
                Ok(format!("bg={}\n", colors["background"]).into_bytes())
            })?;
            ctx.write_file(&self.output, bytes);
            Ok(())
        }

        fn is_installed(&self) -> bool {
            self.installed
        }

        fn required_colors(&self) -> Vec<String> {
            vec!["background".to_string()]
        }

        fn output_path(&self) -> PathBuf {
            self.output.clone()
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        backups: tempfile::TempDir,
        registry: Arc<HandlerRegistry>,
        log: Arc<RecordingLog>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                backups: tempfile::tempdir().unwrap(),
                registry: Arc::new(HandlerRegistry::new()),
                log: Arc::new(RecordingLog::default()),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn add(&self, handler: StubHandler) -> Arc<StubHandler> {
            let handler = Arc::new(handler);
            self.registry
                .register_handler(handler.name.clone(), Arc::clone(&handler) as Arc<dyn ApplicationHandler>)
                .unwrap();
            handler
        }

        fn engine(&self) -> Engine {
            Engine::new(Arc::clone(&self.registry))
                .with_log(Arc::clone(&self.log) as Arc<dyn Log>)
                .with_backups(Arc::new(BackupManager::new(self.backups.path(), 5)))
                .with_cache(Arc::new(CacheStore::new(
                    CacheOptions::default().with_sweep_interval(Duration::ZERO),
                )))
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    // ------------------------------------------------------------------
    // apply_theme
    // ------------------------------------------------------------------

    #[test]
    fn applies_every_target() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        fx.add(StubHandler::new("gtk", &fx.path("gtk.css")));

        let report = fx
            .engine()
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap();

        assert_eq!(read(&fx.path("kitty.conf")), "bg=#1d1f21\n");
        assert_eq!(read(&fx.path("gtk.css")), "bg=#1d1f21\n");
        assert!(report.is_success());
        assert!(report.backup_id.is_some());
        assert!(report.targets.iter().all(|t| t.changed));
        insta::assert_snapshot!(report.summary(), @"2 targets: 2 applied, 0 failed");
        assert_eq!(fx.log.targets().len(), 2);
    }

    #[test]
    fn failing_target_leaves_every_file_untouched() {
        let fx = Fixture::new();
        std::fs::write(fx.path("kitty.conf"), "original").unwrap();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        fx.add(StubHandler::new("gtk", &fx.path("gtk.css")).failing());

        let err = fx
            .engine()
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap_err();

        assert_eq!(err.failed_targets(), vec!["gtk"]);
        assert!(err.to_string().contains("gtk exploded"), "{err}");
        assert_eq!(read(&fx.path("kitty.conf")), "original");
        assert!(!fx.path("gtk.css").exists());
    }

    #[test]
    fn write_failure_rolls_back_the_transaction() {
        let fx = Fixture::new();
        std::fs::write(fx.path("a.conf"), "original").unwrap();
        fx.add(StubHandler::new("a", &fx.path("a.conf")));
        fx.add(StubHandler::new("b", &fx.path("b.conf")));
        let fs = FaultyFileSystemOps::new().fail_writes_to(fx.path("b.conf"));

        let err = fx
            .engine()
            .with_fs_ops(Arc::new(fs))
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::Transaction(_)), "{err}");
        assert_eq!(read(&fx.path("a.conf")), "original");
        assert!(!fx.path("b.conf").exists());
    }

    #[test]
    fn non_transactional_failure_restores_backup() {
        let fx = Fixture::new();
        std::fs::write(fx.path("a.conf"), "original").unwrap();
        fx.add(StubHandler::new("a", &fx.path("a.conf")));
        fx.add(StubHandler::new("b", &fx.path("b.conf")));
        let fs = FaultyFileSystemOps::new().fail_writes_to(fx.path("b.conf"));

        let err = fx
            .engine()
            .with_fs_ops(Arc::new(fs))
            .transactional(false)
            .apply_theme(
                &CancellationToken::new(),
                &sample_scheme(),
                &ApplyOptions {
                    parallel: false,
                    ..ApplyOptions::default()
                },
            )
            .unwrap_err();

        assert_eq!(err.failed_targets(), vec!["b"]);
        assert_eq!(read(&fx.path("a.conf")), "original");
    }

    #[test]
    fn non_transactional_failure_without_backup_undoes_earlier_targets() {
        let fx = Fixture::new();
        std::fs::write(fx.path("a.conf"), "original").unwrap();
        fx.add(StubHandler::new("a", &fx.path("a.conf")));
        fx.add(StubHandler::new("b", &fx.path("b.conf")));
        fx.add(StubHandler::new("c", &fx.path("c.conf")));
        let fs = FaultyFileSystemOps::new().fail_writes_to(fx.path("c.conf"));

        let err = fx
            .engine()
            .with_fs_ops(Arc::new(fs))
            .transactional(false)
            .apply_theme(
                &CancellationToken::new(),
                &sample_scheme(),
                &ApplyOptions {
                    parallel: false,
                    no_backup: true,
                    ..ApplyOptions::default()
                },
            )
            .unwrap_err();

        assert_eq!(err.failed_targets(), vec!["c"]);
        assert_eq!(read(&fx.path("a.conf")), "original");
        assert!(!fx.path("b.conf").exists(), "file created by b must be removed");
        let rolled_back: Vec<String> = fx
            .log
            .targets()
            .into_iter()
            .filter(|t| t.message.as_deref() == Some("rolled back"))
            .map(|t| t.name)
            .collect();
        assert_eq!(rolled_back, vec!["b", "a"]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_render_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        std::fs::write(fx.path("secret.conf"), "original").unwrap();
        std::fs::set_permissions(fx.path("secret.conf"), std::fs::Permissions::from_mode(0o600))
            .unwrap();
        fx.add(StubHandler::new("secret", &fx.path("secret.conf")));
        fx.add(StubHandler::new("gtk", &fx.path("gtk.css")).failing());

        fx.engine()
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap_err();

        let mode = std::fs::metadata(fx.path("secret.conf")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read(&fx.path("secret.conf")), "original");
    }

    #[cfg(unix)]
    #[test]
    fn transaction_rollback_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        std::fs::write(fx.path("a.conf"), "original").unwrap();
        std::fs::set_permissions(fx.path("a.conf"), std::fs::Permissions::from_mode(0o600)).unwrap();
        fx.add(StubHandler::new("a", &fx.path("a.conf")));
        fx.add(StubHandler::new("b", &fx.path("b.conf")));
        let fs = FaultyFileSystemOps::new().fail_writes_to(fx.path("b.conf"));

        let err = fx
            .engine()
            .with_fs_ops(Arc::new(fs))
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::Transaction(_)), "{err}");
        let mode = std::fs::metadata(fx.path("a.conf")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read(&fx.path("a.conf")), "original");
    }

    #[test]
    fn second_identical_apply_is_served_from_cache() {
        let fx = Fixture::new();
        let handler = fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        let engine = fx.engine();
        let scheme = sample_scheme();
        let cancel = CancellationToken::new();

        let first = engine
            .apply_theme(&cancel, &scheme, &ApplyOptions::default())
            .unwrap();
        let second = engine
            .apply_theme(&cancel, &scheme, &ApplyOptions::default())
            .unwrap();

        assert_eq!(handler.renders.load(Ordering::SeqCst), 1);
        assert!(!first.targets[0].cache_hit);
        assert!(second.targets[0].cache_hit);
        assert!(!second.targets[0].changed, "identical content is not rewritten");
        assert_eq!(engine.cache().unwrap().stats().hits, 1);
    }

    #[test]
    fn force_rerenders_and_rewrites() {
        let fx = Fixture::new();
        let handler = fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        let engine = fx.engine();
        let cancel = CancellationToken::new();
        let force = ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        };

        engine.apply_theme(&cancel, &sample_scheme(), &force).unwrap();
        let report = engine.apply_theme(&cancel, &sample_scheme(), &force).unwrap();

        assert_eq!(handler.renders.load(Ordering::SeqCst), 2);
        assert!(report.targets[0].changed);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));

        let report = fx
            .engine()
            .apply_theme(
                &CancellationToken::new(),
                &sample_scheme(),
                &ApplyOptions {
                    dry_run: true,
                    ..ApplyOptions::default()
                },
            )
            .unwrap();

        assert!(!fx.path("kitty.conf").exists());
        assert_eq!(report.count(TargetStatus::DryRun), 1);
        assert!(report.backup_id.is_none());
        let expected = format!("dry_run: would write {}", fx.path("kitty.conf").display());
        assert!(fx.log.lines().contains(&expected), "{:?}", fx.log.lines());
    }

    #[test]
    fn not_installed_targets_are_skipped() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")).not_installed());

        let report = fx
            .engine()
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &ApplyOptions::default())
            .unwrap();

        assert_eq!(report.count(TargetStatus::NotInstalled), 1);
        assert!(!fx.path("kitty.conf").exists());
        assert!(report.backup_id.is_none(), "nothing to back up");
    }

    #[test]
    fn unknown_application_is_rejected_before_io() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        let options = ApplyOptions {
            applications: vec!["kitty".to_string(), "emacs".to_string()],
            ..ApplyOptions::default()
        };

        let err = fx
            .engine()
            .apply_theme(&CancellationToken::new(), &sample_scheme(), &options)
            .unwrap_err();

        assert!(matches!(&err, EngineError::UnknownApplication(name) if name == "emacs"));
        assert!(!fx.path("kitty.conf").exists());
    }

    #[test]
    fn invalid_scheme_is_rejected_before_io() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        let mut scheme = sample_scheme();
        scheme.colors.remove("colour3");

        let err = fx
            .engine()
            .apply_theme(&CancellationToken::new(), &scheme, &ApplyOptions::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(ValidationError::MissingColor(_))));
        assert!(!fx.path("kitty.conf").exists());
        assert!(fx.log.targets().is_empty());
    }

    #[test]
    fn cancelled_apply_reports_cancelled_targets() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .engine()
            .apply_theme(&cancel, &sample_scheme(), &ApplyOptions::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::TargetsFailed(_)));
        assert_eq!(fx.log.targets()[0].status, TargetStatus::Cancelled);
        assert!(!fx.path("kitty.conf").exists());
    }

    // ------------------------------------------------------------------
    // apply_all_themes
    // ------------------------------------------------------------------

    #[test]
    fn best_effort_applies_the_rest() {
        let fx = Fixture::new();
        fx.add(StubHandler::new("kitty", &fx.path("kitty.conf")));
        fx.add(StubHandler::new("gtk", &fx.path("gtk.css")).failing());
        let options = ApplyOptions {
            applications: vec!["kitty".to_string(), "gtk".to_string(), "emacs".to_string()],
            ..ApplyOptions::default()
        };

        let report = fx
            .engine()
            .apply_all_themes(&CancellationToken::new(), &sample_scheme(), &options)
            .unwrap();

        assert_eq!(read(&fx.path("kitty.conf")), "bg=#1d1f21\n");
        let failed: Vec<&str> = report.failed().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(failed, vec!["gtk", "emacs"]);
        insta::assert_snapshot!(report.summary(), @"3 targets: 1 applied, 2 failed");
    }

    // ------------------------------------------------------------------
    // Registry passthrough
    // ------------------------------------------------------------------

    #[test]
    fn supported_applications_are_sorted() {
        let fx = Fixture::new();
        let engine = fx.engine();
        for name in ["qt", "btop", "kitty"] {
            engine
                .register_handler(name, Arc::new(StubHandler::new(name, &fx.path(name))))
                .unwrap();
        }
        assert_eq!(engine.supported_applications(), vec!["btop", "kitty", "qt"]);
        assert!(matches!(
            engine.register_handler("qt", Arc::new(StubHandler::new("qt", &fx.path("qt")))),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn validate_theme_reports_first_problem() {
        let fx = Fixture::new();
        let engine = fx.engine();
        engine.validate_theme(&sample_scheme()).unwrap();
        let mut scheme = sample_scheme();
        scheme.name = String::new();
        assert!(matches!(
            engine.validate_theme(&scheme),
            Err(EngineError::Validation(ValidationError::EmptyName))
        ));
    }

    #[test]
    fn report_summary_mentions_cache_and_skips() {
        let report = ApplyReport {
            targets: vec![
                TargetReport {
                    cache_hit: true,
                    ..TargetReport::new("kitty", TargetStatus::Applied)
                },
                not_installed("gtk"),
            ],
            backup_id: None,
        };
        insta::assert_snapshot!(
            report.summary(),
            @"2 targets: 1 applied, 1 not installed, 0 failed (1 cached)"
        );
    }
}
