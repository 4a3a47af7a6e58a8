//! Pipeline definition and invocation.
//!
//! A pipeline reads files under an input root and writes artifacts under an
//! output root. It is made of one or more branches; each branch selects
//! inputs with a glob and runs them through a chain of filter stages. Stage
//! N writes into its own staging subdirectory, which becomes the input root
//! of stage N+1. The last stage of every branch writes to the output root.
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::{Branch, ConcatFilter, FilterStage, OutputName, Pipeline};
//!
//! let mut pipeline = Pipeline::new("/project/app", "/project/public", "/project/tmp")
//!     .with_branch(
//!         Branch::new("javascripts/*.js").with_filter(
//!             FilterStage::new(ConcatFilter)
//!                 .with_output_name(OutputName::constant("javascripts/application.js")),
//!         ),
//!     );
//!
//! let result = pipeline.invoke_clean(&executor)?;
//! ```

use crate::build::discovery::{discover_files, DiscoveryError};
use crate::build::staging::{self, stage_dir};
use crate::build::{BuildResult, ConcatFilter, ExecutionError, Executor, FileHandle, FilterError, FilterStage};
use std::fs;
use std::path::{Path, PathBuf};

/// Glob used by a branch when none is given.
pub const DEFAULT_GLOB: &str = "**/*";

/// Staging namespace used until a digest is assigned.
pub const DEFAULT_NAMESPACE: &str = "pipeline-default";

/// Error during pipeline setup or invocation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Input discovery failed
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    /// A filter stage could not compute its outputs
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// The executor aborted the build
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Filesystem error on a pipeline directory
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// One glob-selected chain of filters inside a pipeline.
#[derive(Debug)]
pub struct Branch {
    /// Glob pattern relative to the input root
    glob: String,
    /// Optional input root overriding the pipeline's
    input_root: Option<PathBuf>,
    /// Filter chain, applied in order
    filters: Vec<FilterStage>,
}

impl Branch {
    /// Create a branch selecting `glob`.
    pub fn new(glob: impl Into<String>) -> Self {
        Self { glob: glob.into(), input_root: None, filters: Vec::new() }
    }

    /// Read inputs from `root` instead of the pipeline's input root.
    pub fn with_input_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.input_root = Some(root.into());
        self
    }

    /// Append a filter stage.
    pub fn with_filter(mut self, stage: FilterStage) -> Self {
        self.filters.push(stage);
        self
    }

    /// Append a filter stage.
    pub fn add_filter(&mut self, stage: FilterStage) {
        self.filters.push(stage);
    }

    /// Get the glob pattern.
    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Get the input root override.
    pub fn input_root(&self) -> Option<&Path> {
        self.input_root.as_deref()
    }

    /// Get the filter chain.
    pub fn filters(&self) -> &[FilterStage] {
        &self.filters
    }
}

/// A configured pipeline.
#[derive(Debug)]
pub struct Pipeline {
    /// Default directory inputs are read from
    input_root: PathBuf,
    /// Directory final artifacts are written to
    output_root: PathBuf,
    /// Root holding staging directories
    tmpdir: PathBuf,
    /// Name of the active staging directory under `tmpdir`
    staging_namespace: String,
    /// Branches, built in order
    branches: Vec<Branch>,
    /// Whether stage roots and file lists are assigned
    is_setup: bool,
}

impl Pipeline {
    /// Create a pipeline with no branches.
    ///
    /// # Arguments
    /// - `input_root` - Directory inputs are read from
    /// - `output_root` - Directory final artifacts are written to
    /// - `tmpdir` - Root for staging directories
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        tmpdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            tmpdir: tmpdir.into(),
            staging_namespace: DEFAULT_NAMESPACE.to_string(),
            branches: Vec::new(),
            is_setup: false,
        }
    }

    /// Append a branch.
    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.add_branch(branch);
        self
    }

    /// Append a branch.
    pub fn add_branch(&mut self, branch: Branch) {
        self.branches.push(branch);
        self.is_setup = false;
    }

    /// Set the staging namespace.
    pub fn with_staging_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.set_staging_namespace(namespace);
        self
    }

    /// Set the staging namespace. Stage directories are reassigned on the
    /// next invocation.
    pub fn set_staging_namespace(&mut self, namespace: impl Into<String>) {
        self.staging_namespace = namespace.into();
        self.is_setup = false;
    }

    /// Get the staging namespace.
    pub fn staging_namespace(&self) -> &str {
        &self.staging_namespace
    }

    /// Get the active staging directory (`tmpdir/namespace`).
    pub fn staging_dir(&self) -> PathBuf {
        self.tmpdir.join(&self.staging_namespace)
    }

    /// Get the input root.
    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    /// Get the output root.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Get the staging root.
    pub fn tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    /// Get the branches.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Iterate every filter stage in build order.
    pub fn stages(&self) -> impl Iterator<Item = &FilterStage> {
        self.branches.iter().flat_map(|branch| branch.filters.iter())
    }

    /// Whether stage roots and file lists are assigned.
    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Expand globs and wire every stage's roots and input files.
    ///
    /// A branch without filters gets a pass-through [`ConcatFilter`] so its
    /// inputs are copied to the output root unchanged.
    pub fn setup_filters(&mut self) -> Result<(), PipelineError> {
        let staging_dir = self.staging_dir();

        for (index, branch) in self.branches.iter_mut().enumerate() {
            if branch.filters.is_empty() {
                branch.filters.push(FilterStage::new(ConcatFilter));
            }

            let mut root = branch.input_root.clone().unwrap_or_else(|| self.input_root.clone());
            let exclude: Vec<&Path> = [self.tmpdir.as_path(), self.output_root.as_path()]
                .into_iter()
                .filter(|dir| !root.starts_with(dir))
                .collect();
            let mut files = discover_files(&root, &branch.glob, &exclude)?;
            tracing::debug!(
                "Branch {} ('{}') matched {} file(s) under {}",
                index,
                branch.glob,
                files.len(),
                root.display()
            );

            let last = branch.filters.len() - 1;
            for (position, stage) in branch.filters.iter_mut().enumerate() {
                let output_root = if position == last {
                    self.output_root.clone()
                } else {
                    stage_dir(&staging_dir, index, position)
                };

                stage.set_input_root(&root);
                stage.set_input_files(files);
                stage.set_output_root(&output_root);

                files = stage.outputs()?.keys().map(|handle| handle.path().to_path_buf()).collect();
                root = output_root;
            }
        }

        self.is_setup = true;
        Ok(())
    }

    /// Build using the file lists from the last setup.
    ///
    /// Sets up on first use. New or removed input files are not noticed; use
    /// [`Pipeline::invoke_clean`] for that.
    pub fn invoke(&mut self, executor: &dyn Executor) -> Result<BuildResult, PipelineError> {
        if !self.is_setup {
            self.setup_filters()?;
        }

        let staging_dir = self.staging_dir();
        fs::create_dir_all(&staging_dir)
            .map_err(|source| PipelineError::Io { path: staging_dir.clone(), source })?;

        Ok(executor.execute(self)?)
    }

    /// Re-expand globs, then build.
    pub fn invoke_clean(&mut self, executor: &dyn Executor) -> Result<BuildResult, PipelineError> {
        self.setup_filters()?;
        self.invoke(executor)
    }

    /// Full paths of the files the first stage of every branch reads.
    ///
    /// Empty until the pipeline is set up.
    pub fn source_files(&self) -> Vec<PathBuf> {
        self.branches
            .iter()
            .filter_map(|branch| branch.filters.first())
            .filter_map(|stage| {
                let root = stage.input_root()?;
                Some(stage.input_files().iter().map(move |path| root.join(path)))
            })
            .flatten()
            .collect()
    }

    /// Every artifact the pipeline declares under its output root.
    pub fn output_files(&mut self) -> Result<Vec<FileHandle>, PipelineError> {
        if !self.is_setup {
            self.setup_filters()?;
        }

        let mut files = Vec::new();
        for branch in &self.branches {
            if let Some(last) = branch.filters.last() {
                files.extend(last.outputs()?.keys().cloned());
            }
        }
        Ok(files)
    }

    /// Remove the active staging directory.
    pub(crate) fn remove_staging_dir(&self) -> Result<(), PipelineError> {
        let staging_dir = self.staging_dir();
        staging::remove_path(&staging_dir)
            .map_err(|source| PipelineError::Io { path: staging_dir, source })
    }
}
