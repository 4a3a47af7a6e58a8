//! Assetfile loading and discovery
//!
//! Finds `Assetfile.toml`, parses it, and turns it into a [`Pipeline`] using a
//! [`FilterRegistry`] of named filter factories.

use super::schema::{AssetfileConfig, BranchConfig, FilterConfig};
use crate::build::{
    Branch, ConcatFilter, Filter, FilterStage, LoadError, OutputName, Pipeline, PipelineLoader,
};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File name searched for by [`find_assetfile`].
pub const ASSETFILE_NAME: &str = "Assetfile.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse Assetfile.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// A filter kind with no registered factory
    #[error("Unknown filter kind '{kind}' (available: {})", available.join(", "))]
    UnknownFilter {
        /// Requested kind
        kind: String,
        /// Registered kinds
        available: Vec<String>,
    },
}

/// Find Assetfile.toml by walking up from the current working directory.
pub fn find_assetfile() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_assetfile_from)
}

/// Find Assetfile.toml by walking up from a specific directory.
pub fn find_assetfile_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let path = current.join(ASSETFILE_NAME);
        if path.exists() {
            return Some(path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Parse and validate Assetfile text.
pub fn parse_assetfile(source: &str) -> Result<AssetfileConfig, ConfigError> {
    let config: AssetfileConfig = toml::from_str(source)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Load configuration from an Assetfile.toml.
///
/// # Example
/// ```ignore
/// let config = load_assetfile(Path::new("site/Assetfile.toml"))?;
/// println!("{} branch(es)", config.pipelines.len());
/// ```
pub fn load_assetfile(path: &Path) -> Result<AssetfileConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_assetfile(&contents)
}

/// Get the project root directory from an Assetfile path.
///
/// Relative paths are made absolute against the current directory.
pub fn project_root(assetfile: &Path) -> Result<PathBuf, ConfigError> {
    let parent = match assetfile.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => return Ok(env::current_dir()?),
    };

    if parent.is_absolute() {
        Ok(parent)
    } else {
        Ok(env::current_dir()?.join(parent))
    }
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path == Path::new(".") {
        project_root.to_path_buf()
    } else if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Named filter factories available to an Assetfile.
///
/// The default registry knows `concat`.
#[derive(Clone)]
pub struct FilterRegistry {
    factories: BTreeMap<String, FilterFactory>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("concat", || ConcatFilter);
        registry
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry").field("kinds", &self.kinds()).finish()
    }
}

impl FilterRegistry {
    /// Create a registry with no filters.
    pub fn empty() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// Register a factory under `kind`, replacing any previous one.
    pub fn register<F, T>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Filter + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(move || Box::new(factory()) as Box<dyn Filter>));
    }

    /// Register a factory under `kind` and return the registry.
    pub fn with<F, T>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Filter + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Instantiate the filter registered under `kind`.
    pub fn create(&self, kind: &str) -> Result<Box<dyn Filter>, ConfigError> {
        self.factories.get(kind).map(|factory| factory()).ok_or_else(|| {
            ConfigError::UnknownFilter { kind: kind.to_string(), available: self.kinds() }
        })
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// [`PipelineLoader`] for Assetfile.toml text.
#[derive(Debug, Clone, Default)]
pub struct AssetfileLoader {
    registry: FilterRegistry,
}

impl AssetfileLoader {
    /// Create a loader using `registry`.
    pub fn new(registry: FilterRegistry) -> Self {
        Self { registry }
    }

    /// Get the filter registry.
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Build a pipeline from parsed configuration.
    ///
    /// # Arguments
    /// - `config` - Validated configuration
    /// - `root` - Directory relative paths are resolved against
    pub fn build_pipeline(&self, config: &AssetfileConfig, root: &Path) -> Result<Pipeline, ConfigError> {
        let mut pipeline = Pipeline::new(
            resolve_path(root, &config.input),
            resolve_path(root, &config.output),
            resolve_path(root, &config.tmpdir),
        );

        for branch in &config.pipelines {
            pipeline.add_branch(self.build_branch(branch, root)?);
        }

        Ok(pipeline)
    }

    fn build_branch(&self, config: &BranchConfig, root: &Path) -> Result<Branch, ConfigError> {
        let mut branch = Branch::new(&config.glob);
        if let Some(input) = &config.input {
            branch = branch.with_input_root(resolve_path(root, input));
        }

        for filter in &config.filters {
            branch.add_filter(self.build_stage(filter)?);
        }
        Ok(branch)
    }

    fn build_stage(&self, config: &FilterConfig) -> Result<FilterStage, ConfigError> {
        let stage = FilterStage::boxed(self.registry.create(&config.kind)?);

        let output_name = match (&config.output, &config.extension) {
            (Some(output), _) => OutputName::constant(output.clone()),
            (None, Some(extension)) => {
                let extension = extension.clone();
                OutputName::from_fn(move |path| path.with_extension(&extension))
            }
            (None, None) => OutputName::same(),
        };

        Ok(stage.with_output_name(output_name))
    }
}

impl PipelineLoader for AssetfileLoader {
    fn load(&self, source: &str, path: &Path) -> Result<Pipeline, LoadError> {
        let config = parse_assetfile(source)?;
        let root = project_root(path)?;
        Ok(self.build_pipeline(&config, &root)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    const MINIMAL: &str = "output = \"public\"\n\n[[pipeline]]\nglob = \"*.js\"\n";

    #[test]
    fn test_find_assetfile_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(ASSETFILE_NAME);
        File::create(&path)
            .expect("should create config file")
            .write_all(MINIMAL.as_bytes())
            .expect("should write config content");

        assert_eq!(find_assetfile_from(temp.path().to_path_buf()), Some(path));
    }

    #[test]
    fn test_find_assetfile_in_parent_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(ASSETFILE_NAME);
        fs::write(&path, MINIMAL).unwrap();
        let nested = temp.path().join("app/javascripts");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_assetfile_from(nested), Some(path));
    }

    #[test]
    fn test_find_assetfile_not_found() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        // Only meaningful when no Assetfile exists above the temp dir
        if find_assetfile_from(temp.path().to_path_buf()).is_none() {
            assert!(find_assetfile_from(nested).is_none());
        }
    }

    #[test]
    fn test_load_assetfile_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(ASSETFILE_NAME);
        fs::write(&path, MINIMAL).unwrap();

        let config = load_assetfile(&path).unwrap();
        assert_eq!(config.output, PathBuf::from("public"));
        assert_eq!(config.pipelines[0].glob, "*.js");
    }

    #[test]
    fn test_load_assetfile_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = load_assetfile(&temp.path().join(ASSETFILE_NAME));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_parse_assetfile_invalid_toml() {
        let result = parse_assetfile("output = [");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_assetfile_validation_error() {
        let err = parse_assetfile("output = \"public\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("'pipeline'"));
    }

    #[test]
    fn test_resolve_path_absolute() {
        let absolute = if cfg!(windows) { "C:\\abs\\out" } else { "/abs/out" };
        assert_eq!(resolve_path(Path::new("/project"), Path::new(absolute)), PathBuf::from(absolute));
    }

    #[test]
    fn test_resolve_path_relative() {
        assert_eq!(
            resolve_path(Path::new("/project"), Path::new("public")),
            PathBuf::from("/project/public")
        );
    }

    #[test]
    fn test_project_root() {
        let temp = TempDir::new().unwrap();
        let root = project_root(&temp.path().join(ASSETFILE_NAME)).unwrap();
        assert_eq!(root, temp.path());

        let relative = project_root(Path::new(ASSETFILE_NAME)).unwrap();
        assert!(relative.is_absolute());
    }

    #[test]
    fn test_registry_default_has_concat() {
        let registry = FilterRegistry::default();
        assert_eq!(registry.kinds(), vec!["concat".to_string()]);
        assert_eq!(registry.create("concat").unwrap().name(), "concat");
    }

    #[test]
    fn test_registry_unknown_filter() {
        let err = FilterRegistry::default().create("uglify").err().unwrap();
        assert!(matches!(err, ConfigError::UnknownFilter { ref kind, .. } if kind == "uglify"));
        assert!(err.to_string().contains("available: concat"));
    }

    #[test]
    fn test_build_pipeline_resolves_roots_and_names() {
        let config = parse_assetfile(
            r#"
output = "public"
input = "app"

[[pipeline]]
glob = "js/*.js"
[[pipeline.filter]]
kind = "concat"
output = "application.js"

[[pipeline]]
glob = "*.coffee"
input = "scripts"
[[pipeline.filter]]
kind = "concat"
extension = "js"
[[pipeline.filter]]
kind = "concat"
"#,
        )
        .unwrap();
        let root = Path::new("/project");

        let pipeline = AssetfileLoader::default().build_pipeline(&config, root).unwrap();

        assert_eq!(pipeline.input_root(), Path::new("/project/app"));
        assert_eq!(pipeline.output_root(), Path::new("/project/public"));
        assert_eq!(pipeline.tmpdir(), Path::new("/project/tmp"));

        let branches = pipeline.branches();
        assert_eq!(branches.len(), 2);
        let name = |branch: usize, stage: usize, input: &str| {
            branches[branch].filters()[stage].output_name().apply(Path::new(input))
        };
        assert_eq!(name(0, 0, "js/a.js"), PathBuf::from("application.js"));
        assert_eq!(branches[1].input_root(), Some(Path::new("/project/scripts")));
        assert_eq!(branches[1].filters().len(), 2);
        assert_eq!(name(1, 0, "a.coffee"), PathBuf::from("a.js"));
        assert_eq!(name(1, 1, "a.js"), PathBuf::from("a.js"));
    }

    #[test]
    fn test_build_pipeline_unknown_filter() {
        let config = parse_assetfile(
            "output = \"public\"\n[[pipeline]]\n[[pipeline.filter]]\nkind = \"sass\"\n",
        )
        .unwrap();
        let result = AssetfileLoader::default().build_pipeline(&config, Path::new("/project"));
        assert!(matches!(result, Err(ConfigError::UnknownFilter { .. })));
    }

    #[test]
    fn test_loader_uses_custom_registry() {
        let registry = FilterRegistry::empty().with("copy", || ConcatFilter);
        let loader = AssetfileLoader::new(registry);
        let source = "output = \"public\"\n[[pipeline]]\n[[pipeline.filter]]\nkind = \"copy\"\n";

        let path = Path::new("/project/Assetfile.toml");

        let pipeline = loader.load(source, path).unwrap();
        assert_eq!(pipeline.branches()[0].filters()[0].name(), "concat");
        assert!(loader.load(&source.replace("copy", "concat"), path).is_err());
    }
}
