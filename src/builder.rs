use crate::compile::{ResourceLimits, ShaderCompiler};
use crate::error::ConfigError;
use crate::glsl::GlslCompiler;
use crate::native::{NativeCompiler, ProcessNativeCompiler};
use crate::source::normalize_path;
use crate::watcher::{ShaderTool, ShaderWatcher};
use crate::{DEFAULT_DEBOUNCE_MS, DEFAULT_NATIVE_COMPILER};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Settings for one batch build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    inputs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    force_include: Option<PathBuf>,
    output_dir: PathBuf,
    limits: ResourceLimits,
    defines: Vec<(String, String)>,
    force: bool,
}

impl BuildConfig {
    /// Creates a builder writing generated sources to `output_dir`.
    pub fn builder(output_dir: impl AsRef<Path>) -> BuildConfigBuilder {
        BuildConfigBuilder::new(output_dir)
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn force_include(&self) -> Option<&Path> {
        self.force_include.as_deref()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn defines(&self) -> &[(String, String)] {
        &self.defines
    }

    /// Whether every module is rebuilt regardless of timestamps.
    pub fn force(&self) -> bool {
        self.force
    }

    /// Same configuration with the force flag replaced.
    pub fn with_force(&self, force: bool) -> Self {
        Self {
            force,
            ..self.clone()
        }
    }
}

/// Builder for [`BuildConfig`].
///
/// # Example
///
/// ```rust,no_run
/// use glsl_hotreload::BuildConfig;
///
/// let config = BuildConfig::builder("generated")
///     .input("shaders")
///     .include_dir("shaders/include")
///     .define("MAX_LIGHTS", "16")
///     .build()
///     .expect("invalid build configuration");
/// ```
pub struct BuildConfigBuilder {
    inputs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    force_include: Option<PathBuf>,
    output_dir: PathBuf,
    limits: ResourceLimits,
    defines: Vec<(String, String)>,
    force: bool,
}

impl BuildConfigBuilder {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            include_dirs: Vec::new(),
            force_include: None,
            output_dir: output_dir.as_ref().to_path_buf(),
            limits: ResourceLimits::default(),
            defines: Vec::new(),
            force: false,
        }
    }

    /// Adds an input root: a shader file, or a directory scanned recursively.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds an include search directory. Directories are searched in the order added.
    pub fn include_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.include_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the file prepended to every module. Resolved like an include.
    pub fn force_include(mut self, path: impl AsRef<Path>) -> Self {
        self.force_include = Some(path.as_ref().to_path_buf());
        self
    }

    /// Adds a preprocessor definition passed to the compiler.
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Rebuilds every module regardless of timestamps.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An include directory does not exist
    /// - The output directory cannot be created
    /// - The output directory lies inside an input directory
    pub fn build(self) -> Result<BuildConfig, ConfigError> {
        let include_dirs = self
            .include_dirs
            .iter()
            .map(|dir| {
                let dir = normalize_path(dir);
                if dir.is_dir() {
                    Ok(dir)
                } else {
                    Err(ConfigError::NotADirectory(dir))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output_dir = ensure_dir(&self.output_dir)?;
        let inputs: Vec<PathBuf> = self.inputs.iter().map(|p| normalize_path(p)).collect();

        if let Some(input) = inputs
            .iter()
            .find(|input| input.is_dir() && output_dir.starts_with(input))
        {
            return Err(ConfigError::OutputInsideInput {
                output: output_dir,
                input: input.clone(),
            });
        }

        Ok(BuildConfig {
            inputs,
            include_dirs,
            force_include: self.force_include,
            output_dir,
            limits: self.limits,
            defines: self.defines,
            force: self.force,
        })
    }
}

/// Creates `dir` if missing and returns its normalized absolute path.
pub(crate) fn ensure_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    let dir = normalize_path(dir);
    if !dir.exists() {
        tracing::info!(dir = %dir.display(), "directory does not exist, creating");
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }
    if !dir.is_dir() {
        return Err(ConfigError::NotADirectory(dir));
    }
    Ok(dir)
}

/// Everything the two watch loops need. Produced by [`ShaderWatcherBuilder`].
pub struct WatchConfig {
    pub(crate) input_dir: PathBuf,
    pub(crate) intermediate_dir: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) build: BuildConfig,
    pub(crate) shader_tool: ShaderTool,
    pub(crate) native: Arc<dyn NativeCompiler>,
    pub(crate) debounce: Duration,
    pub(crate) clean_rebuild: bool,
}

/// Builder for configuring a [`ShaderWatcher`] instance.
///
/// Watches `input_dir` for shader edits, writes generated C sources into the
/// intermediate directory, and compiles those into shared libraries in
/// `output_dir`.
///
/// # Example
///
/// ```rust,no_run
/// use glsl_hotreload::ShaderWatcher;
///
/// let watcher = ShaderWatcher::builder("shaders", "bin")
///     .intermediate_dir("generated")
///     .include_dir("shaders/include")
///     .force_include("prelude.glsl")
///     .native_compiler("clang")
///     .clean_rebuild(true)
///     .debounce_ms(100)
///     .build()
///     .expect("Failed to initialise shader watcher");
/// ```
pub struct ShaderWatcherBuilder {
    input_dir: PathBuf,
    output_dir: PathBuf,
    intermediate_dir: PathBuf,
    include_dirs: Vec<PathBuf>,
    force_include: Option<PathBuf>,
    defines: Vec<(String, String)>,
    limits: ResourceLimits,
    shader_tool: Option<ShaderTool>,
    native: Option<Arc<dyn NativeCompiler>>,
    native_program: PathBuf,
    debounce_ms: u64,
    clean_rebuild: bool,
}

impl ShaderWatcherBuilder {
    /// Creates a new builder with default settings.
    ///
    /// # Arguments
    ///
    /// * `input_dir` - Directory containing shader sources
    /// * `output_dir` - Directory receiving the compiled shared libraries
    pub fn new(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            intermediate_dir: PathBuf::from("."),
            include_dirs: Vec::new(),
            force_include: None,
            defines: Vec::new(),
            limits: ResourceLimits::default(),
            shader_tool: None,
            native: None,
            native_program: PathBuf::from(DEFAULT_NATIVE_COMPILER),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            clean_rebuild: false,
        }
    }

    /// Sets the directory for generated C sources. Defaults to the current directory.
    pub fn intermediate_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.intermediate_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn include_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.include_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn force_include(mut self, path: impl AsRef<Path>) -> Self {
        self.force_include = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Compiles shaders in-process with `compiler` instead of the default GLSL compiler.
    pub fn shader_compiler(mut self, compiler: Arc<dyn ShaderCompiler>) -> Self {
        self.shader_tool = Some(ShaderTool::InProcess(compiler));
        self
    }

    /// Delegates shader builds to an external executable that accepts the
    /// `build` command line of this crate's binary.
    pub fn shader_tool(mut self, program: impl AsRef<Path>) -> Self {
        self.shader_tool = Some(ShaderTool::External(program.as_ref().to_path_buf()));
        self
    }

    /// Sets the C compiler executable used for the native step.
    pub fn native_compiler(mut self, program: impl AsRef<Path>) -> Self {
        self.native_program = program.as_ref().to_path_buf();
        self
    }

    /// Replaces the native step entirely.
    pub fn native(mut self, native: Arc<dyn NativeCompiler>) -> Self {
        self.native = Some(native);
        self
    }

    /// Sets the debounce interval in milliseconds.
    ///
    /// The watcher waits this long after a change before snapshotting, and
    /// again after each build.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Forces a full rebuild of every shader on start.
    pub fn clean_rebuild(mut self, enabled: bool) -> Self {
        self.clean_rebuild = enabled;
        self
    }

    /// Builds the ShaderWatcher with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A directory is invalid or cannot be created
    /// - The initial build cannot start (e.g. the force include is missing)
    /// - A directory watcher cannot be initialised
    pub fn build(self) -> Result<ShaderWatcher, ConfigError> {
        let input_dir = normalize_path(&self.input_dir);
        if !input_dir.is_dir() {
            return Err(ConfigError::NotADirectory(input_dir));
        }

        let intermediate_dir = ensure_dir(&self.intermediate_dir)?;
        let output_dir = ensure_dir(&self.output_dir)?;

        let mut build = BuildConfig::builder(&intermediate_dir)
            .input(&input_dir)
            .limits(self.limits);
        for dir in &self.include_dirs {
            build = build.include_dir(dir);
        }
        if let Some(force_include) = &self.force_include {
            build = build.force_include(force_include);
        }
        for (name, value) in self.defines {
            build = build.define(name, value);
        }
        let build = build.build()?;

        let shader_tool = self
            .shader_tool
            .unwrap_or_else(|| ShaderTool::InProcess(Arc::new(GlslCompiler::new())));
        let native = self
            .native
            .unwrap_or_else(|| Arc::new(ProcessNativeCompiler::new(&self.native_program)));

        ShaderWatcher::new_with_config(WatchConfig {
            input_dir,
            intermediate_dir,
            output_dir,
            build,
            shader_tool,
            native,
            debounce: Duration::from_millis(self.debounce_ms),
            clean_rebuild: self.clean_rebuild,
        })
    }
}
