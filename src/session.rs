//! One batch build over a set of shader modules.
//!
//! A session owns the include and timestamp caches, so every header and
//! every modification time is read at most once per batch. Per-file
//! failures are collected into the [`BuildReport`] and never stop the batch.

use crate::MANIFEST_NAME;
use crate::builder::BuildConfig;
use crate::compile::{ShaderCompiler, compile_module};
use crate::emit::{Emitter, TEMP_PREFIX, symbol_prefix};
use crate::error::{BuildError, CompileError, ConfigError};
use crate::source::{ForceInclude, IncludeCache, SourceLoader, normalize_path};
use crate::stage::{ShaderStage, is_shader_module};
use crate::staleness::{MtimeCache, is_stale, recorded_output_time};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// Outcome of a batch build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Modules compiled and emitted in this session, by file name.
    pub built: Vec<String>,
    /// Modules whose existing outputs were still current.
    pub up_to_date: Vec<String>,
    pub failures: Vec<BuildError>,
    /// Whether the manifest pair was rewritten.
    pub manifest_written: bool,
}

impl BuildReport {
    /// Negative number of failed files, zero on success.
    pub fn exit_code(&self) -> i32 {
        -i32::try_from(self.failures.len()).unwrap_or(i32::MAX)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Modules that are listed in the manifest.
    pub fn valid(&self) -> impl Iterator<Item = &str> {
        self.built.iter().chain(&self.up_to_date).map(String::as_str)
    }
}

enum Outcome {
    Built,
    UpToDate,
}

/// A single build pass with its session caches.
pub struct BuildSession<'a> {
    config: &'a BuildConfig,
    compiler: &'a dyn ShaderCompiler,
    loader: SourceLoader,
    emitter: Emitter,
    includes: IncludeCache,
    mtimes: MtimeCache,
    force_include: Option<ForceInclude>,
    /// Lowercased output name and C symbol prefix -> first module that
    /// claimed them.
    claimed: HashMap<String, PathBuf>,
}

impl<'a> BuildSession<'a> {
    /// Starts a session, loading the force include if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ForceInclude`] if the force include cannot be
    /// loaded. No module is built in that case.
    pub fn new(config: &'a BuildConfig, compiler: &'a dyn ShaderCompiler) -> Result<Self, ConfigError> {
        let loader = SourceLoader::new(config.include_dirs().to_vec());
        let mut includes = IncludeCache::new();

        let force_include = config
            .force_include()
            .map(|name| {
                loader
                    .load_force_include(name, &mut includes)
                    .map_err(|source| ConfigError::ForceInclude {
                        path: name.to_path_buf(),
                        source,
                    })
            })
            .transpose()?;

        Ok(Self {
            config,
            compiler,
            loader,
            emitter: Emitter::new(config.output_dir()),
            includes,
            mtimes: MtimeCache::new(),
            force_include,
            claimed: HashMap::new(),
        })
    }

    /// Builds every module in `inputs` and refreshes the manifest.
    #[instrument(skip_all, fields(modules = inputs.len(), force = self.config.force()))]
    pub fn run(mut self, inputs: &[PathBuf]) -> BuildReport {
        let mut report = BuildReport::default();

        for path in inputs {
            let name = file_name(path);
            match self.build_one(path) {
                Ok(Outcome::Built) => {
                    info!("Compiled {name}");
                    report.built.push(name);
                }
                Ok(Outcome::UpToDate) => {
                    debug!("{name} is up to date");
                    report.up_to_date.push(name);
                }
                Err(err) => {
                    error!(file = %path.display(), "{err}");
                    report.failures.push(err);
                }
            }
        }

        let entries: Vec<String> = report.valid().map(str::to_string).collect();
        match self.emitter.write_manifest(&entries, !report.built.is_empty()) {
            Ok(written) => report.manifest_written = written,
            Err(source) => {
                let path = self.emitter.output_dir().join(format!("{MANIFEST_NAME}.c"));
                error!(file = %path.display(), "{source}");
                report.failures.push(BuildError::Emit { path, source });
            }
        }

        if report.is_success() {
            info!(
                built = report.built.len(),
                up_to_date = report.up_to_date.len(),
                "build finished"
            );
        } else {
            warn!(
                built = report.built.len(),
                failed = report.failures.len(),
                "build finished with errors"
            );
        }
        report
    }

    fn build_one(&mut self, path: &Path) -> Result<Outcome, BuildError> {
        let stage = ShaderStage::from_path(path).ok_or_else(|| BuildError::Compile {
            path: path.to_path_buf(),
            source: CompileError::UnsupportedStage(path.to_path_buf()),
        })?;

        let name = file_name(path);
        let keys = [name.to_lowercase(), symbol_prefix(&name)];
        if let Some(first) = keys.iter().find_map(|key| self.claimed.get(key)) {
            return Err(BuildError::NameCollision {
                path: path.to_path_buf(),
                first: first.clone(),
            });
        }
        for key in keys {
            self.claimed.insert(key, path.to_path_buf());
        }

        let module = self
            .loader
            .load_module(path, stage, &mut self.includes)
            .map_err(|source| BuildError::Load {
                path: path.to_path_buf(),
                source,
            })?;

        if !self.config.force() {
            let outputs = self.emitter.output_paths(&name);
            let output_time = recorded_output_time(&outputs, &mut self.mtimes);
            if !is_stale(
                &module,
                self.force_include.as_ref(),
                output_time,
                &mut self.mtimes,
            ) {
                return Ok(Outcome::UpToDate);
            }
        }

        let artifact = compile_module(
            self.compiler,
            &module,
            self.force_include.as_ref(),
            self.config.limits(),
            self.config.defines(),
            &self.includes,
        )
        .map_err(|source| BuildError::Compile {
            path: path.to_path_buf(),
            source,
        })?;

        self.emitter
            .emit(&artifact)
            .map_err(|source| BuildError::Emit {
                path: path.to_path_buf(),
                source,
            })?;

        for output in self.emitter.output_paths(&name) {
            self.mtimes.forget(&output);
        }
        Ok(Outcome::Built)
    }
}

/// Runs one batch build over the configured inputs.
///
/// # Errors
///
/// Only configuration problems abort the batch: an input that does not exist
/// or is not a shader, an unreadable input directory, or a force include that
/// fails to load. Per-file failures are reported in the [`BuildReport`].
pub fn run_build(config: &BuildConfig, compiler: &dyn ShaderCompiler) -> Result<BuildReport, ConfigError> {
    let inputs = discover_inputs(config.inputs())?;
    let session = BuildSession::new(config, compiler)?;
    Ok(session.run(&inputs))
}

/// Expands input roots into a sorted, duplicate-free list of module paths.
///
/// Directories are scanned recursively; hidden entries and files without a
/// shader extension are skipped. Explicit files must be shaders.
pub fn discover_inputs(roots: &[PathBuf]) -> Result<Vec<PathBuf>, ConfigError> {
    let mut found = Vec::new();

    for root in roots {
        let root = normalize_path(root);
        if root.is_dir() {
            let walker = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
            for entry in walker {
                let entry = entry.map_err(|source| ConfigError::Scan {
                    path: root.clone(),
                    source,
                })?;
                if entry.file_type().is_file() && is_shader_module(entry.path()) {
                    found.push(entry.into_path());
                }
            }
        } else if root.is_file() {
            if !is_shader_module(&root) {
                return Err(ConfigError::NotAShader(root));
            }
            found.push(root);
        } else {
            return Err(ConfigError::InvalidFile(root));
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name.starts_with(TEMP_PREFIX)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
