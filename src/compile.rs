use crate::error::CompileError;
use crate::source::{ForceInclude, IncludeCache, SourceModule};
use crate::stage::ShaderStage;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resource limits handed to the shader compiler.
///
/// The default is a conservative profile that every desktop Vulkan driver
/// satisfies. Compilers enforce the subset they can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_lights: u32,
    pub max_clip_planes: u32,
    pub max_texture_units: u32,
    pub max_texture_coords: u32,
    pub max_vertex_attribs: u32,
    pub max_vertex_uniform_components: u32,
    pub max_varying_floats: u32,
    pub max_vertex_texture_image_units: u32,
    pub max_combined_texture_image_units: u32,
    pub max_texture_image_units: u32,
    pub max_fragment_uniform_components: u32,
    pub max_draw_buffers: u32,
    pub max_vertex_uniform_vectors: u32,
    pub max_varying_vectors: u32,
    pub max_fragment_uniform_vectors: u32,
    pub max_vertex_output_vectors: u32,
    pub max_fragment_input_vectors: u32,
    pub min_program_texel_offset: i32,
    pub max_program_texel_offset: i32,
    pub max_clip_distances: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_uniform_components: u32,
    pub max_compute_texture_image_units: u32,
    pub max_geometry_output_vertices: u32,
    pub max_geometry_total_output_components: u32,
    pub max_patch_vertices: u32,
    pub max_tess_gen_level: u32,
    pub max_viewports: u32,
    pub max_cull_distances: u32,
    pub max_combined_clip_and_cull_distances: u32,
    pub max_samples: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_lights: 32,
            max_clip_planes: 6,
            max_texture_units: 32,
            max_texture_coords: 32,
            max_vertex_attribs: 64,
            max_vertex_uniform_components: 4096,
            max_varying_floats: 64,
            max_vertex_texture_image_units: 32,
            max_combined_texture_image_units: 80,
            max_texture_image_units: 32,
            max_fragment_uniform_components: 4096,
            max_draw_buffers: 32,
            max_vertex_uniform_vectors: 128,
            max_varying_vectors: 8,
            max_fragment_uniform_vectors: 16,
            max_vertex_output_vectors: 16,
            max_fragment_input_vectors: 15,
            min_program_texel_offset: -8,
            max_program_texel_offset: 7,
            max_clip_distances: 8,
            max_compute_work_group_count: [65535, 65535, 65535],
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_uniform_components: 1024,
            max_compute_texture_image_units: 16,
            max_geometry_output_vertices: 256,
            max_geometry_total_output_components: 1024,
            max_patch_vertices: 32,
            max_tess_gen_level: 64,
            max_viewports: 16,
            max_cull_distances: 8,
            max_combined_clip_and_cull_distances: 8,
            max_samples: 4,
        }
    }
}

/// One named input to a compile.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub name: String,
    pub text: Arc<str>,
}

/// Everything the shader compiler needs for one module.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub stage: ShaderStage,
    /// The force include first (when configured), then the module itself.
    pub units: Vec<SourceUnit>,
    pub limits: &'a ResourceLimits,
    /// Preprocessor definitions passed through from the command line.
    pub defines: &'a [(String, String)],
}

/// A compiler message attached to a failed compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Name of the source unit the message refers to, when known.
    pub unit: Option<String>,
    /// One-based line within that unit.
    pub line: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            unit: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn at(unit: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            unit: Some(unit.into()),
            line: Some(line),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.unit, self.line) {
            (Some(unit), Some(line)) => write!(f, "{unit}:{line}: {}", self.message),
            (Some(unit), None) => write!(f, "{unit}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Why the compiler rejected a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerFailure {
    Parse(Vec<Diagnostic>),
    Link(Vec<Diagnostic>),
}

/// The linked program as produced by a [`ShaderCompiler`].
///
/// `program` carries whatever the compiler needs for its reflection pass.
pub struct CompilerOutput {
    pub words: Vec<u32>,
    pub program: Box<dyn std::any::Any + Send>,
}

impl fmt::Debug for CompilerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerOutput")
            .field("words", &self.words.len())
            .finish_non_exhaustive()
    }
}

/// A uniform block found by reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub name: String,
    pub binding: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionBlock {
    pub uniform_blocks: Vec<UniformBlock>,
    pub pipeline_inputs: u32,
    pub pipeline_outputs: u32,
}

/// The black-box shader compiler.
///
/// Include directives inside the units must be served from `includes`,
/// never from disk.
pub trait ShaderCompiler: Send + Sync {
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        includes: &IncludeCache,
    ) -> Result<CompilerOutput, CompilerFailure>;

    /// Reflection pass over a successfully linked program.
    fn reflect(&self, output: &CompilerOutput) -> ReflectionBlock;
}

/// A successfully compiled module. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    bytecode: Vec<u32>,
    reflection: ReflectionBlock,
    stage: ShaderStage,
    source_name: String,
}

impl CompiledArtifact {
    pub fn new(
        bytecode: Vec<u32>,
        reflection: ReflectionBlock,
        stage: ShaderStage,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            bytecode,
            reflection,
            stage,
            source_name: source_name.into(),
        }
    }

    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    pub fn reflection(&self) -> &ReflectionBlock {
        &self.reflection
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// File name of the module this artifact was built from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

/// Compiles one module, prepending the force include when present.
///
/// Reflection runs once per successful compile.
pub fn compile_module(
    compiler: &dyn ShaderCompiler,
    module: &SourceModule,
    force_include: Option<&ForceInclude>,
    limits: &ResourceLimits,
    defines: &[(String, String)],
    includes: &IncludeCache,
) -> Result<CompiledArtifact, CompileError> {
    let mut units = Vec::with_capacity(2);
    if let Some(force) = force_include {
        units.push(SourceUnit {
            name: unit_name(&force.path),
            text: force.text.clone(),
        });
    }
    units.push(SourceUnit {
        name: unit_name(&module.path),
        text: module.text.clone(),
    });

    let request = CompileRequest {
        stage: module.stage,
        units,
        limits,
        defines,
    };

    let output = compiler
        .compile(&request, includes)
        .map_err(|failure| match failure {
            CompilerFailure::Parse(diagnostics) => CompileError::ParseFailure(diagnostics),
            CompilerFailure::Link(diagnostics) => CompileError::LinkFailure(diagnostics),
        })?;

    if output.words.is_empty() {
        return Err(CompileError::EmptyBytecode);
    }

    let reflection = compiler.reflect(&output);
    debug!(
        module = %module.path.display(),
        words = output.words.len(),
        uniform_blocks = reflection.uniform_blocks.len(),
        "compiled"
    );

    let source_name = module
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(CompiledArtifact::new(
        output.words,
        reflection,
        module.stage,
        source_name,
    ))
}

fn unit_name(path: &std::path::Path) -> String {
    path.display().to_string()
}
