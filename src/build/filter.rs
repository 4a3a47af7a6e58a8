//! Filters and their output mapping.
//!
//! A filter stage reads a list of input files relative to an input root and
//! writes output files relative to an output root. Which output each input
//! contributes to is decided by an [`OutputName`] generator; the grouping is
//! computed by [`FilterStage::outputs`].
//!
//! # Example
//!
//! ```ignore
//! use assetpipe::build::{ConcatFilter, FilterStage, OutputName};
//!
//! let mut stage = FilterStage::new(ConcatFilter)
//!     .with_output_name(OutputName::constant("bundle.js"));
//! stage.set_input_root("/project/app");
//! stage.set_output_root("/project/public");
//! stage.set_input_files(vec!["a.js".into(), "b.js".into()]);
//!
//! let outputs = stage.outputs()?;
//! assert_eq!(outputs.len(), 1);
//! ```

use crate::build::{FileError, FileHandle, OutputFile};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error raised by a filter stage.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FilterError {
    /// A root directory was not assigned before computing outputs
    #[error("Filter '{filter}' has no {root} root")]
    MissingRoot {
        /// Name of the filter
        filter: String,
        /// Which root is missing ("input" or "output")
        root: &'static str,
    },
    /// File handle error while reading inputs or writing the output
    #[error(transparent)]
    File(#[from] FileError),
    /// Transformation-specific failure
    #[error("Filter '{filter}' failed: {message}")]
    Transform {
        /// Name of the filter
        filter: String,
        /// Error message
        message: String,
    },
}

impl FilterError {
    /// Create a transformation error for the named filter.
    pub fn transform(filter: impl Into<String>, message: impl Into<String>) -> Self {
        FilterError::Transform { filter: filter.into(), message: message.into() }
    }
}

/// A transformation applied by a filter stage.
///
/// Implementations receive the inputs that map to one output, in the order
/// they appeared in the stage's input list, and write the output through the
/// open session. The session is created and closed by the caller.
pub trait Filter: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Produce `output` from `inputs`.
    fn generate_output(
        &self,
        inputs: &[FileHandle],
        output: &mut OutputFile,
    ) -> Result<(), FilterError>;
}

/// Writes every input to the output, in order.
///
/// With [`OutputName::same`] this copies files; with a constant name it
/// concatenates them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatFilter;

impl Filter for ConcatFilter {
    fn name(&self) -> &str {
        "concat"
    }

    fn generate_output(
        &self,
        inputs: &[FileHandle],
        output: &mut OutputFile,
    ) -> Result<(), FilterError> {
        for input in inputs {
            output.write(input.read_bytes()?)?;
        }
        Ok(())
    }
}

/// Maps an input path to the output path it contributes to.
#[derive(Clone)]
pub struct OutputName(Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>);

impl OutputName {
    /// Each input maps to an output of the same relative path.
    pub fn same() -> Self {
        Self(Arc::new(|input: &Path| input.to_path_buf()))
    }

    /// Every input maps to `name` (many-to-one).
    pub fn constant(name: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self(Arc::new(move |_: &Path| name.clone()))
    }

    /// Use an arbitrary function of the input path.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Path) -> PathBuf + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Compute the output path for `input`.
    pub fn apply(&self, input: &Path) -> PathBuf {
        (self.0)(input)
    }
}

impl Default for OutputName {
    fn default() -> Self {
        Self::same()
    }
}

impl fmt::Debug for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputName(..)")
    }
}

/// Output handles mapped to the inputs that contribute to them.
///
/// Keys keep first-seen order and each input list keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputMap {
    entries: Vec<(FileHandle, Vec<FileHandle>)>,
    index: HashMap<FileHandle, usize>,
}

impl OutputMap {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `input` to the list for `output`, creating it if absent.
    pub fn insert(&mut self, output: FileHandle, input: FileHandle) {
        match self.index.get(&output) {
            Some(&idx) => self.entries[idx].1.push(input),
            None => {
                self.index.insert(output.clone(), self.entries.len());
                self.entries.push((output, vec![input]));
            }
        }
    }

    /// Get the inputs for an output.
    pub fn get(&self, output: &FileHandle) -> Option<&[FileHandle]> {
        self.index.get(output).map(|&idx| self.entries[idx].1.as_slice())
    }

    /// Number of distinct outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no outputs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate outputs in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &FileHandle> {
        self.entries.iter().map(|(output, _)| output)
    }

    /// Iterate `(output, inputs)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&FileHandle, &[FileHandle])> {
        self.entries.iter().map(|(output, inputs)| (output, inputs.as_slice()))
    }
}

/// A configured filter: the transformation plus its file mapping.
pub struct FilterStage {
    /// Transformation to run
    filter: Box<dyn Filter>,
    /// Output path generator
    output_name: OutputName,
    /// Input paths relative to `input_root`, in order
    input_files: Vec<PathBuf>,
    /// Directory inputs are read from
    input_root: Option<PathBuf>,
    /// Directory outputs are written to
    output_root: Option<PathBuf>,
}

impl FilterStage {
    /// Create a stage for `filter` that keeps input names.
    pub fn new(filter: impl Filter + 'static) -> Self {
        Self::boxed(Box::new(filter))
    }

    /// Create a stage from an already boxed filter.
    pub fn boxed(filter: Box<dyn Filter>) -> Self {
        Self {
            filter,
            output_name: OutputName::same(),
            input_files: Vec::new(),
            input_root: None,
            output_root: None,
        }
    }

    /// Set the output name generator.
    pub fn with_output_name(mut self, output_name: OutputName) -> Self {
        self.output_name = output_name;
        self
    }

    /// Get the filter's name.
    pub fn name(&self) -> &str {
        self.filter.name()
    }

    /// Get the transformation.
    pub fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }

    /// Get the output name generator.
    pub fn output_name(&self) -> &OutputName {
        &self.output_name
    }

    /// Get the input paths.
    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Replace the input paths.
    pub fn set_input_files(&mut self, files: Vec<PathBuf>) {
        self.input_files = files;
    }

    /// Get the input root, if assigned.
    pub fn input_root(&self) -> Option<&Path> {
        self.input_root.as_deref()
    }

    /// Assign the input root.
    pub fn set_input_root(&mut self, root: impl Into<PathBuf>) {
        self.input_root = Some(root.into());
    }

    /// Get the output root, if assigned.
    pub fn output_root(&self) -> Option<&Path> {
        self.output_root.as_deref()
    }

    /// Assign the output root.
    pub fn set_output_root(&mut self, root: impl Into<PathBuf>) {
        self.output_root = Some(root.into());
    }

    /// Group input handles by the output handle they map to.
    ///
    /// Inputs are visited in `input_files` order, so many-to-one outputs list
    /// their inputs in that order.
    pub fn outputs(&self) -> Result<OutputMap, FilterError> {
        let input_root = self.input_root.as_ref().ok_or_else(|| self.missing_root("input"))?;
        let output_root = self.output_root.as_ref().ok_or_else(|| self.missing_root("output"))?;

        let mut map = OutputMap::new();
        for file in &self.input_files {
            let output = FileHandle::new(output_root, self.output_name.apply(file));
            map.insert(output, FileHandle::new(input_root, file));
        }
        Ok(map)
    }

    /// Run the transformation for one output.
    pub fn generate_output(
        &self,
        inputs: &[FileHandle],
        output: &mut OutputFile,
    ) -> Result<(), FilterError> {
        self.filter.generate_output(inputs, output)
    }

    fn missing_root(&self, root: &'static str) -> FilterError {
        FilterError::MissingRoot { filter: self.name().to_string(), root }
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("filter", &self.name())
            .field("input_files", &self.input_files)
            .field("input_root", &self.input_root)
            .field("output_root", &self.output_root)
            .finish()
    }
}
