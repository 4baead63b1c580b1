//! Per-target staging area handed to [`ApplicationHandler::apply`].
//!
//! [`ApplicationHandler::apply`]: crate::handlers::ApplicationHandler::apply

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ApplyOptions;
use crate::cache::CacheStore;
use crate::exec::Executor;
use crate::fs::FileSystemOps;
use crate::logging::Log;
use crate::transaction::{CommandOp, FileWrite, Operation};

/// Collects the operations one target wants to perform.
///
/// Nothing touches the filesystem until the engine executes the staged
/// operations, so a handler may be called in dry-run mode safely.
#[derive(Debug)]
pub struct TargetContext<'a> {
    target: &'a str,
    cache_key: String,
    cache: Option<&'a CacheStore<Vec<u8>>>,
    options: &'a ApplyOptions,
    log: &'a dyn Log,
    fs: &'a Arc<dyn FileSystemOps>,
    executor: &'a Arc<dyn Executor>,
    operations: Vec<Operation>,
    cache_hit: bool,
}

/// What a target staged, returned by [`TargetContext::finish`].
#[derive(Debug, Default)]
pub struct StagedTarget {
    /// Operations in the order they were staged.
    pub operations: Vec<Operation>,
    /// Whether the render was served from the cache.
    pub cache_hit: bool,
}

impl<'a> TargetContext<'a> {
    /// Create a context for `target`.
    #[must_use]
    pub fn new(
        target: &'a str,
        cache_key: String,
        cache: Option<&'a CacheStore<Vec<u8>>>,
        options: &'a ApplyOptions,
        log: &'a dyn Log,
        fs: &'a Arc<dyn FileSystemOps>,
        executor: &'a Arc<dyn Executor>,
    ) -> Self {
        Self {
            target,
            cache_key,
            cache,
            options,
            log,
            fs,
            executor,
            operations: Vec::new(),
            cache_hit: false,
        }
    }

    /// Return the cached render for this target, or run `render` and cache
    /// its output.
    ///
    /// With `force` set the cache is not consulted, but the fresh render is
    /// still stored. A failure to store is logged, not returned.
    ///
    /// # Errors
    ///
    /// Propagates any error from `render`.
    pub fn render_cached(&mut self, render: impl FnOnce() -> Result<Vec<u8>>) -> Result<Vec<u8>> {
        if !self.options.force
            && let Some(cache) = self.cache
            && let Some(bytes) = cache.get(&self.cache_key)
        {
            self.log.debug(&format!("{}: render served from cache", self.target));
            self.cache_hit = true;
            return Ok(bytes);
        }
        let bytes = render()?;
        if let Some(cache) = self.cache
            && let Err(e) = cache.set(self.cache_key.clone(), bytes.clone(), bytes.len())
        {
            self.log.warn(&format!("{}: not cached: {e}", self.target));
        }
        Ok(bytes)
    }

    /// Stage an atomic write of `contents` to `path`.
    pub fn write_file(&mut self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        let op = FileWrite::new(path, contents, Arc::clone(self.fs)).forced(self.options.force);
        self.operations.push(Operation::FileWrite(op));
    }

    /// Stage running `program` with `args`.
    pub fn run_command(&mut self, program: &str, args: &[String]) {
        let op = CommandOp::new(program, args.to_vec(), Arc::clone(self.executor));
        self.operations.push(Operation::Command(op));
    }

    /// Stage an arbitrary operation.
    pub fn stage(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Directory whose templates override the configured ones, if any.
    #[must_use]
    pub fn template_dir(&self) -> Option<&Path> {
        self.options.template_dir.as_deref()
    }

    /// Whether this is a dry run.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Whether cache reads and unchanged-content skips are disabled.
    #[must_use]
    pub const fn force(&self) -> bool {
        self.options.force
    }

    /// Whether verbose output was requested.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.options.verbose
    }

    /// Logger for this target (buffered during parallel dispatch).
    #[must_use]
    pub const fn log(&self) -> &dyn Log {
        self.log
    }

    /// Name of the target being applied.
    #[must_use]
    pub const fn target_name(&self) -> &str {
        self.target
    }

    /// Cache key of this target's render.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Number of operations staged so far.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.operations.len()
    }

    /// Consume the context, yielding what was staged.
    #[must_use]
    pub fn finish(self) -> StagedTarget {
        StagedTarget {
            operations: self.operations,
            cache_hit: self.cache_hit,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::exec::SystemExecutor;
    use crate::fs::SystemFileSystemOps;
    use crate::logging::RecordingLog;
    use crate::transaction::OperationKind;
    use std::time::Duration;

    struct Fixture {
        cache: CacheStore<Vec<u8>>,
        log: RecordingLog,
        fs: Arc<dyn FileSystemOps>,
        executor: Arc<dyn Executor>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cache: CacheStore::new(CacheOptions::default().with_sweep_interval(Duration::ZERO)),
                log: RecordingLog::default(),
                fs: Arc::new(SystemFileSystemOps),
                executor: Arc::new(SystemExecutor),
            }
        }

        fn context<'a>(&'a self, options: &'a ApplyOptions) -> TargetContext<'a> {
            TargetContext::new(
                "kitty",
                "kitty:dark:abc".to_string(),
                Some(&self.cache),
                options,
                &self.log,
                &self.fs,
                &self.executor,
            )
        }
    }

    #[test]
    fn second_render_is_a_cache_hit() {
        let fixture = Fixture::new();
        let options = ApplyOptions::default();

        let mut first = fixture.context(&options);
        let bytes = first.render_cached(|| Ok(b"rendered".to_vec())).unwrap();
        assert_eq!(bytes, b"rendered");
        assert!(!first.finish().cache_hit);

        let mut second = fixture.context(&options);
        let bytes = second
            .render_cached(|| anyhow::bail!("must not render again"))
            .unwrap();
        assert_eq!(bytes, b"rendered");
        assert!(second.finish().cache_hit);
    }

    #[test]
    fn force_skips_cache_read() {
        let fixture = Fixture::new();
        fixture
            .cache
            .set("kitty:dark:abc", b"stale".to_vec(), 5)
            .unwrap();
        let options = ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        };
        let mut ctx = fixture.context(&options);
        let bytes = ctx.render_cached(|| Ok(b"fresh".to_vec())).unwrap();
        assert_eq!(bytes, b"fresh");
        assert_eq!(fixture.cache.get("kitty:dark:abc").unwrap(), b"fresh");
    }

    #[test]
    fn render_error_is_not_cached() {
        let fixture = Fixture::new();
        let options = ApplyOptions::default();
        let mut ctx = fixture.context(&options);
        ctx.render_cached(|| anyhow::bail!("bad template"))
            .unwrap_err();
        assert!(!fixture.cache.contains("kitty:dark:abc"));
    }

    #[test]
    fn debug_output_names_the_target() {
        let fixture = Fixture::new();
        let options = ApplyOptions::default();
        let ctx = fixture.context(&options);
        let debug = format!("{ctx:?}");
        assert!(debug.contains("\"kitty\""), "{debug}");
        assert!(debug.contains("dyn Log"), "{debug}");
    }

    #[test]
    fn staged_operations_keep_order() {
        let fixture = Fixture::new();
        let options = ApplyOptions::default();
        let mut ctx = fixture.context(&options);
        ctx.write_file("/tmp/kitty.conf", b"x".to_vec());
        ctx.run_command("kitty", &["@".to_string(), "load-config".to_string()]);
        assert_eq!(ctx.staged_count(), 2);

        let staged = ctx.finish();
        let kinds: Vec<OperationKind> = staged.operations.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec![OperationKind::FileWrite, OperationKind::Command]);
        assert_eq!(staged.operations[1].description(), "run kitty @ load-config");
    }
}
