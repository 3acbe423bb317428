//! The native compile step run on generated C sources.

use crate::error::ProcessError;
use crate::process;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Turns one generated C source into a loadable shared library.
pub trait NativeCompiler: Send + Sync {
    /// Compiles `source` into `output_dir` and returns the library path.
    fn compile_to_library(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError>;
}

/// Shared library path for a generated source, e.g. `basic.vert.c` ->
/// `libbasic.vert.so` on Linux.
pub fn library_path(source: &Path, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{DLL_PREFIX}{stem}.{DLL_EXTENSION}"))
}

/// Removes the library built from `source`. Returns true if one existed.
pub fn remove_library(source: &Path, output_dir: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(library_path(source, output_dir)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Invokes a C compiler with a `cc`-compatible command line.
#[derive(Debug, Clone)]
pub struct ProcessNativeCompiler {
    program: PathBuf,
    extra_args: Vec<OsString>,
}

impl ProcessNativeCompiler {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            extra_args: Vec::new(),
        }
    }

    /// Appends an argument placed before the source file.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    fn args(&self, source: &Path, library: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-shared".into(), "-fPIC".into(), "-O2".into()];
        if let Some(dir) = source.parent() {
            let mut include = OsString::from("-I");
            include.push(dir);
            args.push(include);
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("-o".into());
        args.push(library.into());
        args.push(source.into());
        args
    }
}

impl NativeCompiler for ProcessNativeCompiler {
    fn compile_to_library(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        let library = library_path(source, output_dir);
        let result = process::run_checked(&self.program, self.args(source, &library))?;
        if !result.output.trim().is_empty() {
            tracing::debug!(source = %source.display(), "{}", result.output.trim_end());
        }
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_name_keeps_the_stage_suffix() {
        let lib = library_path(Path::new("/gen/basic.vert.c"), Path::new("/bin"));
        assert_eq!(
            lib,
            Path::new("/bin").join(format!("{DLL_PREFIX}basic.vert.{DLL_EXTENSION}"))
        );
    }

    #[test]
    fn command_line_ends_with_output_and_source() {
        let cc = ProcessNativeCompiler::new("cc").arg("-g");
        let args = cc.args(Path::new("/gen/a.frag.c"), Path::new("/bin/liba.frag.so"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-shared", "-fPIC", "-O2", "-I/gen", "-g", "-o", "/bin/liba.frag.so", "/gen/a.frag.c"]
        );
    }

    #[test]
    fn removing_a_missing_library_is_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!remove_library(Path::new("gone.vert.c"), tmp.path()).unwrap());

        let lib = library_path(Path::new("here.vert.c"), tmp.path());
        std::fs::write(&lib, "").unwrap();
        assert!(remove_library(Path::new("here.vert.c"), tmp.path()).unwrap());
        assert!(!lib.exists());
    }
}
