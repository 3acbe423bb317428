//! In-process GLSL compiler built on `naga`.
//!
//! The GLSL front end has no include support, so include directives are
//! expanded here from the session's [`IncludeCache`]. Each header is expanded
//! at most once per compile unit.

use crate::compile::{
    CompileRequest, CompilerFailure, CompilerOutput, Diagnostic, ReflectionBlock,
    ResourceLimits, ShaderCompiler, UniformBlock,
};
use crate::source::{IncludeCache, parse_include};
use crate::stage::ShaderStage;
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::trace;

/// GLSL to SPIR-V compiler.
///
/// Supports vertex, fragment and compute modules. Geometry and tessellation
/// modules are rejected with a parse diagnostic.
#[derive(Debug, Clone, Default)]
pub struct GlslCompiler {
    _private: (),
}

/// What the reflection pass needs from a linked program.
struct LinkedProgram {
    module: naga::Module,
    stage: naga::ShaderStage,
}

/// Origin of every line of the expanded text.
///
/// Line `n` of the expanded text came from `lines[n - 1]`: an index into
/// `units` plus the one-based line within that unit.
#[derive(Debug, Default)]
struct LineMap {
    units: Vec<String>,
    lines: Vec<(usize, u32)>,
}

impl LineMap {
    fn unit(&mut self, name: &str) -> usize {
        if let Some(index) = self.units.iter().position(|u| u == name) {
            return index;
        }
        self.units.push(name.to_string());
        self.units.len() - 1
    }

    fn push(&mut self, unit: usize, line: u32) {
        self.lines.push((unit, line));
    }

    /// Maps a one-based line of the expanded text back to its unit and line.
    fn locate(&self, line: u32, message: String) -> Diagnostic {
        let origin = (line as usize)
            .checked_sub(1)
            .and_then(|index| self.lines.get(index));
        match origin {
            Some(&(unit, unit_line)) => Diagnostic::at(self.units[unit].clone(), unit_line, message),
            None => Diagnostic::new(message),
        }
    }
}

impl GlslCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShaderCompiler for GlslCompiler {
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        includes: &IncludeCache,
    ) -> Result<CompilerOutput, CompilerFailure> {
        let stage = naga_stage(request.stage).ok_or_else(|| {
            CompilerFailure::Parse(vec![Diagnostic::new(format!(
                "{} shaders are not supported by the GLSL front end",
                request.stage
            ))])
        })?;

        let (source, line_map) = expand_units(request, includes)?;

        let mut options = glsl::Options::from(stage);
        for (name, value) in request.defines {
            options.defines.insert(name.clone(), value.clone());
        }

        let module = glsl::Frontend::default()
            .parse(&options, &source)
            .map_err(|errors| {
                CompilerFailure::Parse(
                    errors
                        .errors
                        .iter()
                        .map(|error| {
                            let line = error.meta.location(&source).line_number;
                            line_map.locate(line, error.kind.to_string())
                        })
                        .collect(),
                )
            })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|error| {
                CompilerFailure::Link(vec![Diagnostic::new(error_chain(&error.into_inner()))])
            })?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == stage)
            .ok_or_else(|| {
                CompilerFailure::Link(vec![Diagnostic::new(format!(
                    "no {} entry point",
                    request.stage
                ))])
            })?;

        check_limits(&module, entry_point, request.stage, request.limits)
            .map_err(CompilerFailure::Link)?;

        let pipeline = spv::PipelineOptions {
            shader_stage: stage,
            entry_point: entry_point.name.clone(),
        };
        let words = spv::write_vec(&module, &info, &spv::Options::default(), Some(&pipeline))
            .map_err(|error| CompilerFailure::Link(vec![Diagnostic::new(error.to_string())]))?;

        trace!(words = words.len(), "naga emitted SPIR-V");

        Ok(CompilerOutput {
            words,
            program: Box::new(LinkedProgram { module, stage }),
        })
    }

    fn reflect(&self, output: &CompilerOutput) -> ReflectionBlock {
        let Some(program) = output.program.downcast_ref::<LinkedProgram>() else {
            return ReflectionBlock::default();
        };
        let module = &program.module;

        let uniform_blocks = module
            .global_variables
            .iter()
            .filter(|(_, var)| matches!(var.space, naga::AddressSpace::Uniform))
            .map(|(_, var)| {
                let ty = &module.types[var.ty];
                UniformBlock {
                    name: ty
                        .name
                        .clone()
                        .or_else(|| var.name.clone())
                        .unwrap_or_default(),
                    binding: var.binding.as_ref().map_or(0, |b| b.binding),
                    size: ty.inner.size(module.to_ctx()),
                }
            })
            .collect();

        let (pipeline_inputs, pipeline_outputs) = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == program.stage)
            .map_or((0, 0), |ep| {
                let inputs: u32 = ep
                    .function
                    .arguments
                    .iter()
                    .map(|arg| count_locations(module, arg.ty, arg.binding.as_ref()))
                    .sum();
                let outputs = ep
                    .function
                    .result
                    .as_ref()
                    .map_or(0, |r| count_locations(module, r.ty, r.binding.as_ref()));
                (inputs, outputs)
            });

        ReflectionBlock {
            uniform_blocks,
            pipeline_inputs,
            pipeline_outputs,
        }
    }
}

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        ShaderStage::Geometry | ShaderStage::TessControl | ShaderStage::TessEval => None,
    }
}

/// User-defined varyings only; built-ins are not counted.
fn count_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
) -> u32 {
    match binding {
        Some(naga::Binding::Location { .. }) => 1,
        Some(naga::Binding::BuiltIn(_)) => 0,
        None => match &module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .map(|m| count_locations(module, m.ty, m.binding.as_ref()))
                .sum(),
            _ => 0,
        },
    }
}

fn check_limits(
    module: &naga::Module,
    entry_point: &naga::EntryPoint,
    stage: ShaderStage,
    limits: &ResourceLimits,
) -> Result<(), Vec<Diagnostic>> {
    let mut problems = Vec::new();

    if stage == ShaderStage::Vertex {
        let attribs: u32 = entry_point
            .function
            .arguments
            .iter()
            .map(|arg| count_locations(module, arg.ty, arg.binding.as_ref()))
            .sum();
        if attribs > limits.max_vertex_attribs {
            problems.push(Diagnostic::new(format!(
                "{attribs} vertex inputs exceed the limit of {}",
                limits.max_vertex_attribs
            )));
        }
    }

    if stage == ShaderStage::Compute {
        let axes = ["x", "y", "z"];
        for ((size, max), axis) in entry_point
            .workgroup_size
            .iter()
            .zip(limits.max_compute_work_group_size.iter())
            .zip(axes)
        {
            if size > max {
                problems.push(Diagnostic::new(format!(
                    "local_size_{axis} = {size} exceeds the limit of {max}"
                )));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Concatenates the request's units, expanding include directives from the cache.
fn expand_units(
    request: &CompileRequest<'_>,
    includes: &IncludeCache,
) -> Result<(String, LineMap), CompilerFailure> {
    let mut source = String::new();
    let mut line_map = LineMap::default();
    let mut seen = HashSet::new();
    let mut problems = Vec::new();

    for unit in &request.units {
        let mut expansion = Expansion {
            includes,
            seen: &mut seen,
            out: &mut source,
            line_map: &mut line_map,
            problems: &mut problems,
        };
        expansion.expand(&unit.name, &unit.text);
    }

    if problems.is_empty() {
        Ok((source, line_map))
    } else {
        Err(CompilerFailure::Parse(problems))
    }
}

struct Expansion<'a> {
    includes: &'a IncludeCache,
    seen: &'a mut HashSet<PathBuf>,
    out: &'a mut String,
    line_map: &'a mut LineMap,
    problems: &'a mut Vec<Diagnostic>,
}

impl Expansion<'_> {
    fn expand(&mut self, unit: &str, text: &str) {
        let unit_index = self.line_map.unit(unit);
        let includes = self.includes;
        for (index, line) in text.lines().enumerate() {
            let line_number = index as u32 + 1;
            match parse_include(line) {
                None => self.emit(line, unit_index, line_number),
                Some(Ok(name)) => match includes.lookup(name) {
                    Some((path, header)) => {
                        if self.seen.insert(path.to_path_buf()) {
                            let header_unit = path.display().to_string();
                            self.expand(&header_unit, header);
                        } else {
                            self.emit("", unit_index, line_number);
                        }
                    }
                    None => {
                        self.problems.push(Diagnostic::at(
                            unit,
                            line_number,
                            format!("include \"{name}\" was not loaded"),
                        ));
                        self.emit("", unit_index, line_number);
                    }
                },
                Some(Err(())) => {
                    self.problems
                        .push(Diagnostic::at(unit, line_number, "malformed include directive"));
                    self.emit("", unit_index, line_number);
                }
            }
        }
    }

    fn emit(&mut self, line: &str, unit: usize, line_number: u32) {
        self.out.push_str(line);
        self.out.push('\n');
        self.line_map.push(unit, line_number);
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::SourceUnit;
    use crate::source::SourceLoader;
    use std::sync::Arc;
    use tempfile::TempDir;

    const PRELUDE: &str = "#version 450\n";

    const VERTEX: &str = "\
layout(set = 0, binding = 0) uniform Globals {
    mat4 mvp;
} globals;

layout(location = 0) in vec3 position;
layout(location = 0) out vec4 color;

void main() {
    color = vec4(1.0);
    gl_Position = globals.mvp * vec4(position, 1.0);
}
";

    fn request<'a>(
        stage: ShaderStage,
        units: &[(&str, &str)],
        limits: &'a ResourceLimits,
    ) -> CompileRequest<'a> {
        CompileRequest {
            stage,
            units: units
                .iter()
                .map(|(name, text)| SourceUnit {
                    name: name.to_string(),
                    text: Arc::from(*text),
                })
                .collect(),
            limits,
            defines: &[],
        }
    }

    #[test]
    fn compiles_vertex_module_and_reflects() {
        let limits = ResourceLimits::default();
        let compiler = GlslCompiler::new();
        let req = request(
            ShaderStage::Vertex,
            &[("prelude.glsl", PRELUDE), ("basic.vert", VERTEX)],
            &limits,
        );

        let output = compiler.compile(&req, &IncludeCache::new()).unwrap();
        assert_eq!(output.words.first(), Some(&0x0723_0203));

        let reflection = compiler.reflect(&output);
        assert_eq!(reflection.uniform_blocks.len(), 1);
        assert_eq!(reflection.uniform_blocks[0].binding, 0);
        assert_eq!(reflection.uniform_blocks[0].size, 64);
        assert_eq!(reflection.pipeline_inputs, 1);
        assert_eq!(reflection.pipeline_outputs, 1);
    }

    #[test]
    fn same_source_gives_same_words() {
        let limits = ResourceLimits::default();
        let compiler = GlslCompiler::new();
        let req = request(
            ShaderStage::Vertex,
            &[("prelude.glsl", PRELUDE), ("basic.vert", VERTEX)],
            &limits,
        );

        let first = compiler.compile(&req, &IncludeCache::new()).unwrap();
        let second = compiler.compile(&req, &IncludeCache::new()).unwrap();
        assert_eq!(first.words, second.words);
    }

    #[test]
    fn syntax_error_is_a_parse_failure_in_the_right_unit() {
        let limits = ResourceLimits::default();
        let req = request(
            ShaderStage::Fragment,
            &[("prelude.glsl", PRELUDE), ("broken.frag", "void main() {\n    oops\n")],
            &limits,
        );

        match GlslCompiler::new().compile(&req, &IncludeCache::new()) {
            Err(CompilerFailure::Parse(diagnostics)) => {
                assert!(!diagnostics.is_empty());
            }
            Err(other) => panic!("expected a parse failure, got {other:?}"),
            Ok(_) => panic!("expected a parse failure"),
        }
    }

    #[test]
    fn geometry_is_rejected() {
        let limits = ResourceLimits::default();
        let req = request(ShaderStage::Geometry, &[("a.geom", "void main() {}")], &limits);
        assert!(matches!(
            GlslCompiler::new().compile(&req, &IncludeCache::new()),
            Err(CompilerFailure::Parse(_))
        ));
    }

    #[test]
    fn includes_are_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("color.glsl"), "vec4 tint() { return vec4(1.0); }\n")
            .unwrap();
        let module = tmp.path().join("tinted.frag");
        std::fs::write(
            &module,
            "#include \"color.glsl\"\nlayout(location = 0) out vec4 o;\nvoid main() { o = tint(); }\n",
        )
        .unwrap();

        let loader = SourceLoader::new(vec![tmp.path().to_path_buf()]);
        let mut cache = IncludeCache::new();
        let loaded = loader
            .load_module(&module, ShaderStage::Fragment, &mut cache)
            .unwrap();
        std::fs::remove_file(tmp.path().join("color.glsl")).unwrap();

        let limits = ResourceLimits::default();
        let req = request(
            ShaderStage::Fragment,
            &[("prelude.glsl", PRELUDE), ("tinted.frag", &*loaded.text)],
            &limits,
        );
        let output = GlslCompiler::new().compile(&req, &cache).unwrap();
        assert!(!output.words.is_empty());
    }

    #[test]
    fn unloaded_include_is_reported() {
        let limits = ResourceLimits::default();
        let req = request(
            ShaderStage::Fragment,
            &[("a.frag", "#include \"missing.glsl\"\nvoid main() {}\n")],
            &limits,
        );
        match GlslCompiler::new().compile(&req, &IncludeCache::new()) {
            Err(CompilerFailure::Parse(diagnostics)) => {
                assert_eq!(diagnostics[0].unit.as_deref(), Some("a.frag"));
                assert_eq!(diagnostics[0].line, Some(1));
            }
            Err(other) => panic!("expected a parse failure, got {other:?}"),
            Ok(_) => panic!("expected a parse failure"),
        }
    }

    #[test]
    fn oversized_workgroup_is_a_link_failure() {
        let limits = ResourceLimits::default();
        let req = request(
            ShaderStage::Compute,
            &[
                ("prelude.glsl", PRELUDE),
                ("big.comp", "layout(local_size_x = 1, local_size_y = 1, local_size_z = 128) in;\nvoid main() {}\n"),
            ],
            &limits,
        );
        match GlslCompiler::new().compile(&req, &IncludeCache::new()) {
            Err(CompilerFailure::Link(diagnostics)) => {
                assert!(diagnostics[0].message.contains("local_size_z"));
            }
            Err(other) => panic!("expected a link failure, got {other:?}"),
            Ok(_) => panic!("expected a link failure"),
        }
    }

    #[test]
    fn locate_maps_lines_to_units() {
        let mut map = LineMap::default();
        let prelude = map.unit("prelude");
        let main = map.unit("main");
        map.push(prelude, 1);
        map.push(main, 1);
        map.push(main, 2);

        let d = map.locate(3, "bad".to_string());
        assert_eq!(d.unit.as_deref(), Some("main"));
        assert_eq!(d.line, Some(2));
        assert_eq!(map.locate(9, "bad".to_string()).unit, None);
    }

    #[test]
    fn error_after_include_points_at_the_including_line() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("big.glsl"),
            "const float A = 1.0;\nconst float B = 2.0;\nconst float C = 3.0;\nconst float D = 4.0;\nconst float E = 5.0;\n",
        )
        .unwrap();
        let module = tmp.path().join("bad.frag");
        std::fs::write(
            &module,
            "layout(location = 0) out vec4 o;\n#include \"big.glsl\"\nvoid main() {\n    o = vec4(undefined_thing);\n}\n",
        )
        .unwrap();

        let loader = SourceLoader::new(vec![tmp.path().to_path_buf()]);
        let mut cache = IncludeCache::new();
        let loaded = loader
            .load_module(&module, ShaderStage::Fragment, &mut cache)
            .unwrap();

        let limits = ResourceLimits::default();
        let req = request(
            ShaderStage::Fragment,
            &[("prelude.glsl", PRELUDE), ("bad.frag", &*loaded.text)],
            &limits,
        );
        match GlslCompiler::new().compile(&req, &cache) {
            Err(CompilerFailure::Parse(diagnostics)) => {
                let d = diagnostics
                    .iter()
                    .find(|d| d.message.contains("undefined_thing"))
                    .expect("diagnostic for the undefined identifier");
                assert_eq!(d.unit.as_deref(), Some("bad.frag"));
                assert_eq!(d.line, Some(4));
            }
            Err(other) => panic!("expected a parse failure, got {other:?}"),
            Ok(_) => panic!("expected a parse failure"),
        }
    }
}
