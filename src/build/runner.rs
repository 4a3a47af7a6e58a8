//! Pipeline lifecycle.
//!
//! A [`Runner`] owns one [`Pipeline`] and the [`Executor`] that builds it. When
//! the pipeline comes from a configuration file, the runner hashes the file
//! text on every [`Runner::invoke_clean`] and rebuilds the pipeline when the
//! digest changes. Each configuration version stages its intermediate files
//! under its own `pipeline-<digest>` directory; directories left over from
//! earlier versions are removed when a new one takes over.
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::{Runner, TaskGraphExecutor};
//! use assetpipe::config::AssetfileLoader;
//! use std::sync::Arc;
//!
//! let mut runner = Runner::from_path(
//!     "Assetfile.toml",
//!     AssetfileLoader::default(),
//!     Arc::new(TaskGraphExecutor::new()),
//! )?;
//!
//! runner.invoke_clean()?;
//! ```

use crate::build::staging::{self, namespace_for};
use crate::build::{BuildResult, Executor, Pipeline, PipelineError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error returned by a [`PipelineLoader`].
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Builds a pipeline from configuration text.
pub trait PipelineLoader: Send + Sync {
    /// Build a pipeline from `source`, read from `path`.
    fn load(&self, source: &str, path: &Path) -> Result<Pipeline, LoadError>;
}

/// Builds the executor for a configuration version.
pub type ExecutorFactory =
    Box<dyn Fn(&str, &Path) -> Result<Arc<dyn Executor>, LoadError> + Send + Sync>;

impl<F> PipelineLoader for F
where
    F: Fn(&str, &Path) -> Result<Pipeline, LoadError> + Send + Sync,
{
    fn load(&self, source: &str, path: &Path) -> Result<Pipeline, LoadError> {
        self(source, path)
    }
}

/// Error during a runner operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// The configuration file could not be read
    #[error("Failed to read configuration {}: {source}", path.display())]
    ConfigurationRead {
        /// Configuration path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The loader rejected the configuration
    #[error("Failed to load configuration {}: {source}", path.display())]
    Load {
        /// Configuration path
        path: PathBuf,
        /// Loader error
        #[source]
        source: LoadError,
    },
    /// The pipeline failed to build
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Filesystem error while cleaning up
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Owns a pipeline, its executor, and its configuration version.
pub struct Runner {
    /// Active pipeline
    pipeline: Pipeline,
    /// Executor passed to every invocation
    executor: Arc<dyn Executor>,
    /// Loader used to rebuild the pipeline
    loader: Option<Box<dyn PipelineLoader>>,
    /// Rebuilds the executor along with the pipeline
    executor_factory: Option<ExecutorFactory>,
    /// Configuration file the pipeline was loaded from
    configuration_path: Option<PathBuf>,
    /// Digest of the configuration text the pipeline was built from
    configuration_digest: Option<String>,
    /// Number of rebuilds since construction
    rebuild_count: usize,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("pipeline", &self.pipeline)
            .field("configuration_path", &self.configuration_path)
            .field("configuration_digest", &self.configuration_digest)
            .field("rebuild_count", &self.rebuild_count)
            .field("rebuilds_executor", &self.executor_factory.is_some())
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner from a configuration file.
    ///
    /// Reads and loads the file, stages under its digest, and removes staging
    /// directories of any other version.
    ///
    /// # Arguments
    /// - `path` - Configuration file
    /// - `loader` - Builds a pipeline from the file text
    /// - `executor` - Executor used by every invocation
    pub fn from_path(
        path: impl Into<PathBuf>,
        loader: impl PipelineLoader + 'static,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, RunnerError> {
        let path = path.into();
        let source = read_source(&path)?;
        let digest = staging::digest(&source);

        let mut pipeline = loader
            .load(&source, &path)
            .map_err(|source| RunnerError::Load { path: path.clone(), source })?;
        pipeline.set_staging_namespace(namespace_for(&digest));
        tracing::debug!("Loaded {} (digest {})", path.display(), digest);

        let runner = Self {
            pipeline,
            executor,
            loader: Some(Box::new(loader)),
            executor_factory: None,
            configuration_path: Some(path),
            configuration_digest: Some(digest),
            rebuild_count: 0,
        };
        runner.cleanup_stale_staging()?;
        Ok(runner)
    }

    /// Wrap an already built pipeline. It is never reloaded.
    pub fn from_pipeline(pipeline: Pipeline, executor: Arc<dyn Executor>) -> Self {
        Self {
            pipeline,
            executor,
            loader: None,
            executor_factory: None,
            configuration_path: None,
            configuration_digest: None,
            rebuild_count: 0,
        }
    }

    /// Rebuild the executor from the new text whenever the configuration
    /// changes, so settings it carries follow the file.
    pub fn with_executor_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &Path) -> Result<Arc<dyn Executor>, LoadError> + Send + Sync + 'static,
    {
        self.executor_factory = Some(Box::new(factory));
        self
    }

    /// Replace the executor used by later invocations.
    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        self.executor = executor;
    }

    /// Build with the current pipeline and its last file lists.
    pub fn invoke(&mut self) -> Result<BuildResult, RunnerError> {
        Ok(self.pipeline.invoke(self.executor.as_ref())?)
    }

    /// Reload the pipeline if its configuration changed, then build with
    /// freshly expanded globs.
    ///
    /// When the file cannot be read or loaded, the previous pipeline stays
    /// active and the error is returned.
    pub fn invoke_clean(&mut self) -> Result<BuildResult, RunnerError> {
        if let Some(path) = self.configuration_path.clone() {
            let source = read_source(&path)?;
            let digest = staging::digest(&source);
            if self.configuration_digest.as_deref() != Some(digest.as_str()) {
                self.rebuild(&source, &path, digest)?;
            }
        }

        Ok(self.pipeline.invoke_clean(self.executor.as_ref())?)
    }

    fn rebuild(&mut self, source: &str, path: &Path, digest: String) -> Result<(), RunnerError> {
        let Some(loader) = &self.loader else {
            return Ok(());
        };

        let load_error = |source| RunnerError::Load { path: path.to_path_buf(), source };
        let mut pipeline = loader.load(source, path).map_err(load_error)?;
        pipeline.set_staging_namespace(namespace_for(&digest));
        let executor = match &self.executor_factory {
            Some(factory) => Some(factory(source, path).map_err(load_error)?),
            None => None,
        };

        tracing::info!(
            "{} changed, rebuilding pipeline ({} -> {})",
            path.display(),
            self.configuration_digest.as_deref().unwrap_or("none"),
            digest
        );

        let previous = std::mem::replace(&mut self.pipeline, pipeline);
        if let Some(executor) = executor {
            self.executor = executor;
        }
        self.configuration_digest = Some(digest);
        self.rebuild_count += 1;

        if previous.tmpdir() != self.pipeline.tmpdir() {
            let old_tmpdir = previous.tmpdir();
            let removed = staging::cleanup_stale(old_tmpdir, self.pipeline.staging_namespace())
                .map_err(|source| RunnerError::Io { path: old_tmpdir.to_path_buf(), source })?;
            tracing::info!(
                "Staging moved to {}, removed {} directories from {}",
                self.pipeline.tmpdir().display(),
                removed.len(),
                old_tmpdir.display()
            );
        }
        self.cleanup_stale_staging()?;
        Ok(())
    }

    /// Remove staging directories that do not belong to the current version.
    pub fn cleanup_stale_staging(&self) -> Result<Vec<PathBuf>, RunnerError> {
        let tmpdir = self.pipeline.tmpdir();
        let removed = staging::cleanup_stale(tmpdir, self.pipeline.staging_namespace())
            .map_err(|source| RunnerError::Io { path: tmpdir.to_path_buf(), source })?;
        if !removed.is_empty() {
            tracing::info!("Removed {} stale staging directories", removed.len());
        }
        Ok(removed)
    }

    /// Remove every staging directory and every declared output.
    pub fn clobber(&mut self) -> Result<(), RunnerError> {
        self.cleanup_stale_staging()?;
        self.pipeline.remove_staging_dir()?;

        for file in self.pipeline.output_files()? {
            let path = file.fullpath();
            tracing::debug!("Removing {}", path.display());
            staging::remove_path(&path).map_err(|source| RunnerError::Io { path, source })?;
        }
        Ok(())
    }

    /// Get the active staging namespace.
    pub fn staging_namespace(&self) -> &str {
        self.pipeline.staging_namespace()
    }

    /// Get the digest of the loaded configuration.
    pub fn configuration_digest(&self) -> Option<&str> {
        self.configuration_digest.as_deref()
    }

    /// Get the configuration file path.
    pub fn configuration_path(&self) -> Option<&Path> {
        self.configuration_path.as_deref()
    }

    /// Get the active pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Get the executor.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Number of times the pipeline was rebuilt after construction.
    pub fn rebuild_count(&self) -> usize {
        self.rebuild_count
    }
}

fn read_source(path: &Path) -> Result<String, RunnerError> {
    fs::read_to_string(path)
        .map_err(|source| RunnerError::ConfigurationRead { path: path.to_path_buf(), source })
}
