//! Error types for every stage of the pipeline.
//!
//! Per-file errors ([`LoadError`], [`CompileError`], [`EmitError`]) are wrapped
//! in a [`BuildError`] and collected by the session; they never abort a batch.
//! [`WatchError`] is fatal to the watch loop that produced it.

use crate::compile::Diagnostic;
use std::path::PathBuf;

/// Failure to load a module or one of its includes.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// An include name could not be resolved against the search directories.
    #[error("include file \"{name}\" not found (included from {from})")]
    IncludeNotFound {
        /// The name as written in the directive.
        name: String,
        /// The file containing the directive.
        from: PathBuf,
    },

    /// A `#include` line without a quoted or bracketed operand.
    #[error("include directive \"{line}\" in {path} could not be parsed")]
    MalformedInclude { path: PathBuf, line: String },

    /// A file reached itself through its own include chain, or the chain
    /// exceeded the depth limit.
    #[error("cyclic include: {}", format_chain(.chain))]
    CyclicInclude { chain: Vec<PathBuf> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failure reported by the compilation driver.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The file extension does not map to a shader stage.
    #[error("unknown shader stage for {0}")]
    UnsupportedStage(PathBuf),

    #[error("failed to parse:\n{}", format_diagnostics(.0))]
    ParseFailure(Vec<Diagnostic>),

    #[error("failed to link:\n{}", format_diagnostics(.0))]
    LinkFailure(Vec<Diagnostic>),

    /// Linking succeeded but produced no instruction words.
    #[error("no binary data generated")]
    EmptyBytecode,
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure to write a generated file.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A single file's build failure. The batch continues past these.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to load {path}: {source}")]
    Load { path: PathBuf, source: LoadError },

    #[error("failed to compile {path}: {source}")]
    Compile { path: PathBuf, source: CompileError },

    #[error("failed to emit {path}: {source}")]
    Emit { path: PathBuf, source: EmitError },

    /// Two modules in different directories share a file name and would
    /// write the same generated files.
    #[error("{path} produces the same output as {first}")]
    NameCollision { path: PathBuf, first: PathBuf },
}

impl BuildError {
    /// The source file whose build failed.
    pub fn path(&self) -> &std::path::Path {
        match self {
            BuildError::Load { path, .. }
            | BuildError::Compile { path, .. }
            | BuildError::Emit { path, .. }
            | BuildError::NameCollision { path, .. } => path,
        }
    }
}

/// Failure of an external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be launched at all.
    #[error("failed to launch \"{program}\": {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The tool ran but reported failure.
    #[error("\"{program}\" exited with {}:\n{output}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Failed {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

/// Fatal failure of a watch loop. The other loop keeps running.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("failed to snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("failed to start watch thread for {path}: {source}")]
    Thread {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The notification source hung up.
    #[error("change notifications for {0} stopped")]
    ChannelClosed(PathBuf),
}

/// Invalid configuration detected before any build starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("\"{0}\" is not a valid file")]
    InvalidFile(PathBuf),

    #[error("\"{0}\" does not have a compileable extension")]
    NotAShader(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("\"{0}\" is not a directory")]
    NotADirectory(PathBuf),

    #[error("output directory {output} lies inside input directory {input}")]
    OutputInsideInput { output: PathBuf, input: PathBuf },

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("failed to load force include {path}: {source}")]
    ForceInclude { path: PathBuf, source: LoadError },

    #[error("failed to start watching: {0}")]
    Watch(#[from] WatchError),
}
