//! Incremental GLSL to SPIR-V build pipeline with hot-reload watching.
//!
//! This crate compiles GLSL shader modules into C sources that embed the
//! SPIR-V words and reflection tables, keeps an aggregate manifest of every
//! valid module, and can watch the shader tree so edits are rebuilt and
//! cascaded into native shared libraries without restarting anything.
//!
//! # Quick Start
//!
//! One-shot batch build:
//!
//! ```rust,no_run
//! use glsl_hotreload::{BuildConfig, GlslCompiler, run_build};
//!
//! let config = BuildConfig::builder("generated")
//!     .input("shaders")
//!     .include_dir("shaders/include")
//!     .force_include("prelude.glsl")
//!     .build()
//!     .expect("invalid build configuration");
//!
//! let report = run_build(&config, &GlslCompiler::new()).expect("force include failed to load");
//! std::process::exit(report.exit_code());
//! ```
//!
//! Watching:
//!
//! ```rust,no_run
//! use glsl_hotreload::ShaderWatcher;
//!
//! let watcher = ShaderWatcher::builder("shaders", "bin")
//!     .intermediate_dir("generated")
//!     .debounce_ms(100)
//!     .build()
//!     .expect("Failed to initialise shader watcher");
//!
//! loop {
//!     if watcher.check_for_reload() {
//!         // reload the shared libraries in `bin`
//!     }
//!     # break;
//! }
//! ```

pub mod builder;
pub mod compile;
pub mod emit;
pub mod error;
pub mod glsl;
pub mod native;
pub mod process;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod stage;
pub mod staleness;
pub mod watcher;

pub use builder::{BuildConfig, BuildConfigBuilder, ShaderWatcherBuilder};
pub use compile::{
    CompileRequest, CompiledArtifact, CompilerFailure, CompilerOutput, Diagnostic,
    ReflectionBlock, ResourceLimits, ShaderCompiler, SourceUnit, UniformBlock,
};
pub use emit::Emitter;
pub use error::{BuildError, CompileError, ConfigError, EmitError, LoadError, ProcessError, WatchError};
pub use glsl::GlslCompiler;
pub use native::{NativeCompiler, ProcessNativeCompiler};
pub use session::{BuildReport, BuildSession, run_build};
pub use snapshot::{ChangeSet, WatchSnapshot};
pub use source::{IncludeCache, SourceLoader, SourceModule};
pub use stage::ShaderStage;
pub use watcher::{ShaderWatcher, ShaderTool};

const DEFAULT_DEBOUNCE_MS: u64 = 100;
const DEFAULT_NATIVE_COMPILER: &str = "cc";

/// Base name of the aggregate manifest pair written into every output directory.
pub const MANIFEST_NAME: &str = "shaders";

/// Shared header declaring the reflection structures referenced by generated code.
pub const REFLECTION_HEADER: &str = "shader_reflection.h";
