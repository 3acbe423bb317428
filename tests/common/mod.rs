#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use glsl_hotreload::{
    CompileRequest, CompilerFailure, CompilerOutput, Diagnostic, IncludeCache, NativeCompiler,
    ProcessError, ReflectionBlock, ShaderCompiler, UniformBlock,
};
use glsl_hotreload::native::library_path;
use parking_lot::Mutex;

/// Deterministic stand-in for the GLSL compiler.
///
/// Words are derived from the unit texts. A module containing `BROKEN`
/// fails to parse.
#[derive(Default)]
pub struct FakeCompiler {
    pub compiled: Mutex<Vec<String>>,
}

impl FakeCompiler {
    /// File names compiled so far, sorted.
    pub fn compiled(&self) -> Vec<String> {
        let mut names = self.compiled.lock().clone();
        names.sort();
        names
    }

    pub fn reset(&self) {
        self.compiled.lock().clear();
    }
}

impl ShaderCompiler for FakeCompiler {
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        _includes: &IncludeCache,
    ) -> Result<CompilerOutput, CompilerFailure> {
        let Some(module) = request.units.last() else {
            return Err(CompilerFailure::Parse(vec![Diagnostic::new("no units")]));
        };
        let name = Path::new(&module.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.compiled.lock().push(name);

        if module.text.contains("BROKEN") {
            return Err(CompilerFailure::Parse(vec![Diagnostic::at(
                module.name.clone(),
                1,
                "syntax error",
            )]));
        }

        let mut words = vec![0x0723_0203];
        for unit in &request.units {
            words.push(unit.text.len() as u32);
            words.push(unit.text.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b))));
        }
        Ok(CompilerOutput {
            words,
            program: Box::new(()),
        })
    }

    fn reflect(&self, _output: &CompilerOutput) -> ReflectionBlock {
        ReflectionBlock {
            uniform_blocks: vec![UniformBlock {
                name: "Globals".to_string(),
                binding: 0,
                size: 64,
            }],
            pipeline_inputs: 1,
            pipeline_outputs: 1,
        }
    }
}

/// Writes an empty file where the library would go.
#[derive(Default)]
pub struct FakeNative {
    pub calls: Mutex<Vec<PathBuf>>,
}

impl NativeCompiler for FakeNative {
    fn compile_to_library(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        self.calls.lock().push(source.to_path_buf());
        let library = library_path(source, output_dir);
        fs::write(&library, "").map_err(|source| ProcessError::Spawn {
            program: "fake".to_string(),
            source,
        })?;
        Ok(library)
    }
}

pub fn write(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

pub fn set_time(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// An hour ago, safely older than anything the build writes.
pub fn past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3600)
}

/// An hour ahead, safely newer than anything the build writes.
pub fn future() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

/// Polls `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}
