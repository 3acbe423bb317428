//! C source generation for compiled modules and the aggregate manifest.
//!
//! Every module becomes a declaration unit (`<name>.h`) and a definition unit
//! (`<name>.c`) that embeds the SPIR-V words and reflection tables. The
//! manifest pair (`shaders.h`/`shaders.c`) lists every valid module. All
//! files are replaced atomically through a temp file and a rename.

use crate::compile::CompiledArtifact;
use crate::error::EmitError;
use crate::stage::ShaderStage;
use crate::{MANIFEST_NAME, REFLECTION_HEADER};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const GENERATED_BANNER: &str = "// Generated by glsl-hotreload. Do not modify.";

/// Prefix of in-flight temp files. Watchers skip these.
pub const TEMP_PREFIX: &str = ".tmp";

const WORDS_PER_LINE: usize = 8;

/// Writes generated sources into one output directory.
#[derive(Debug, Clone)]
pub struct Emitter {
    output_dir: PathBuf,
}

impl Emitter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Declaration and definition paths for a module file name.
    pub fn output_paths(&self, source_name: &str) -> [PathBuf; 2] {
        [
            self.output_dir.join(format!("{source_name}.h")),
            self.output_dir.join(format!("{source_name}.c")),
        ]
    }

    /// Writes the declaration and definition units for one artifact.
    pub fn emit(&self, artifact: &CompiledArtifact) -> Result<(), EmitError> {
        self.ensure_reflection_header()?;

        let [header, source] = self.output_paths(artifact.source_name());
        write_atomic(&header, &render_declaration(artifact))?;
        write_atomic(&source, &render_definition(artifact))?;

        debug!(artifact = artifact.source_name(), "emitted");
        Ok(())
    }

    /// Removes the generated pair of a module. Returns true if anything was removed.
    pub fn remove(&self, source_name: &str) -> Result<bool, EmitError> {
        let mut removed = false;
        for path in self.output_paths(source_name) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(EmitError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    /// Rewrites the manifest pair for `entries`.
    ///
    /// With `force` unset, the files are only replaced when their content
    /// would change. Returns true if the manifest was written.
    pub fn write_manifest(&self, entries: &[String], force: bool) -> Result<bool, EmitError> {
        let mut entries = entries.to_vec();
        entries.sort();
        entries.dedup();

        self.ensure_reflection_header()?;

        let header_path = self.output_dir.join(format!("{MANIFEST_NAME}.h"));
        let source_path = self.output_dir.join(format!("{MANIFEST_NAME}.c"));
        let header = render_manifest_declaration();
        let source = render_manifest_definition(&entries);

        let written = if force {
            write_atomic(&header_path, &header)?;
            write_atomic(&source_path, &source)?;
            true
        } else {
            let header_written = write_if_changed(&header_path, &header)?;
            let source_written = write_if_changed(&source_path, &source)?;
            header_written || source_written
        };

        if written {
            info!(modules = entries.len(), dir = %self.output_dir.display(), "manifest updated");
        }
        Ok(written)
    }

    fn ensure_reflection_header(&self) -> Result<(), EmitError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| EmitError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        write_if_changed(&self.output_dir.join(REFLECTION_HEADER), &render_reflection_header())?;
        Ok(())
    }
}

/// C identifier prefix derived from a module file name, e.g. `basic.vert` -> `basic_vert_`.
pub fn symbol_prefix(source_name: &str) -> String {
    let mut prefix: String = source_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if prefix.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        prefix.insert(0, '_');
    }
    prefix.push('_');
    prefix
}

fn guard_macro(name: &str) -> String {
    let mut guard = symbol_prefix(name).to_ascii_uppercase();
    guard.push_str("H_");
    guard
}

fn c_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            c if c.is_ascii() && !c.is_ascii_control() => quoted.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(quoted, "\\{byte:03o}");
                }
            }
        }
    }
    quoted.push('"');
    quoted
}

pub fn render_declaration(artifact: &CompiledArtifact) -> String {
    let name = artifact.source_name();
    let prefix = symbol_prefix(name);
    let guard = guard_macro(name);

    let mut out = String::new();
    let _ = writeln!(out, "{GENERATED_BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include \"{REFLECTION_HEADER}\"");
    let _ = writeln!(out);
    let _ = writeln!(out, "extern const ShaderModule {prefix}shader;");
    let _ = writeln!(out);
    let _ = writeln!(out, "#endif");
    out
}

pub fn render_definition(artifact: &CompiledArtifact) -> String {
    let name = artifact.source_name();
    let prefix = symbol_prefix(name);
    let reflection = artifact.reflection();
    let words = artifact.bytecode();

    let mut out = String::new();
    let _ = writeln!(out, "{GENERATED_BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include {}", c_string(&format!("{name}.h")));
    let _ = writeln!(out);

    let _ = writeln!(out, "static const unsigned {prefix}prog[] = {{");
    for (index, line) in words.chunks(WORDS_PER_LINE).enumerate() {
        let last_line = (index + 1) * WORDS_PER_LINE >= words.len();
        let hex: Vec<String> = line.iter().map(|w| format!("0x{w:08x}")).collect();
        let _ = writeln!(out, "\t{}{}", hex.join(", "), if last_line { "" } else { "," });
    }
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    let _ = writeln!(out, "static const char * const {prefix}ubo_names[] = {{");
    for block in &reflection.uniform_blocks {
        let _ = writeln!(out, "\t{},", c_string(&block.name));
    }
    let _ = writeln!(out, "\t\"\"");
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    let _ = writeln!(out, "static const ShaderUniformBlock {prefix}ubos[] = {{");
    for block in &reflection.uniform_blocks {
        let _ = writeln!(out, "\t{{ {}, {} }},", block.binding, block.size);
    }
    let _ = writeln!(out, "\t{{ 0, 0 }}");
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    let _ = writeln!(out, "SHADER_EXPORT const ShaderModule {prefix}shader = {{");
    let _ = writeln!(out, "\t{},", c_string(name));
    let _ = writeln!(out, "\t\"main\",");
    let _ = writeln!(out, "\t{prefix}prog,");
    let _ = writeln!(out, "\t{prefix}ubo_names,");
    let _ = writeln!(out, "\t{prefix}ubos,");
    let _ = writeln!(out, "\t{},", words.len());
    let _ = writeln!(out, "\t{},", artifact.stage().tag());
    let _ = writeln!(out, "\t{},", reflection.uniform_blocks.len());
    let _ = writeln!(out, "\t{},", reflection.pipeline_inputs);
    let _ = writeln!(out, "\t{}", reflection.pipeline_outputs);
    let _ = writeln!(out, "}};");
    out
}

fn render_manifest_declaration() -> String {
    let guard = guard_macro(MANIFEST_NAME);
    let mut out = String::new();
    let _ = writeln!(out, "{GENERATED_BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include \"{REFLECTION_HEADER}\"");
    let _ = writeln!(out);
    let _ = writeln!(out, "extern const unsigned shader_count;");
    let _ = writeln!(out, "extern const ShaderModule * const shaders[];");
    let _ = writeln!(out);
    let _ = writeln!(out, "#endif");
    out
}

fn render_manifest_definition(entries: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{GENERATED_BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include \"{MANIFEST_NAME}.h\"");
    for entry in entries {
        let _ = writeln!(out, "#include {}", c_string(&format!("{entry}.h")));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "const unsigned shader_count = {};", entries.len());
    let _ = writeln!(out, "const ShaderModule * const shaders[] = {{");
    for entry in entries {
        let _ = writeln!(out, "\t&{}shader,", symbol_prefix(entry));
    }
    let _ = writeln!(out, "\t0");
    let _ = writeln!(out, "}};");
    out
}

fn render_reflection_header() -> String {
    let guard = guard_macro(REFLECTION_HEADER.trim_end_matches(".h"));
    let mut out = String::new();
    let _ = writeln!(out, "{GENERATED_BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#if defined(_WIN32)");
    let _ = writeln!(out, "#define SHADER_EXPORT __declspec(dllexport)");
    let _ = writeln!(out, "#elif defined(__GNUC__)");
    let _ = writeln!(out, "#define SHADER_EXPORT __attribute__((visibility(\"default\")))");
    let _ = writeln!(out, "#else");
    let _ = writeln!(out, "#define SHADER_EXPORT");
    let _ = writeln!(out, "#endif");
    let _ = writeln!(out);
    let _ = writeln!(out, "typedef enum ShaderStageType {{");
    for (index, stage) in ShaderStage::ALL.iter().enumerate() {
        let sep = if index + 1 < ShaderStage::ALL.len() { "," } else { "" };
        let _ = writeln!(out, "\t{}{sep}", stage.tag());
    }
    let _ = writeln!(out, "}} ShaderStageType;");
    let _ = writeln!(out);
    let _ = writeln!(out, "typedef struct ShaderUniformBlock {{");
    let _ = writeln!(out, "\tunsigned binding;");
    let _ = writeln!(out, "\tunsigned size;");
    let _ = writeln!(out, "}} ShaderUniformBlock;");
    let _ = writeln!(out);
    let _ = writeln!(out, "typedef struct ShaderModule {{");
    let _ = writeln!(out, "\tconst char *name;");
    let _ = writeln!(out, "\tconst char *entry_point;");
    let _ = writeln!(out, "\tconst unsigned *code;");
    let _ = writeln!(out, "\tconst char * const *ubo_names;");
    let _ = writeln!(out, "\tconst ShaderUniformBlock *ubos;");
    let _ = writeln!(out, "\tunsigned code_size;");
    let _ = writeln!(out, "\tShaderStageType stage;");
    let _ = writeln!(out, "\tunsigned ubo_count;");
    let _ = writeln!(out, "\tunsigned input_count;");
    let _ = writeln!(out, "\tunsigned output_count;");
    let _ = writeln!(out, "}} ShaderModule;");
    let _ = writeln!(out);
    let _ = writeln!(out, "#endif");
    out
}

/// Replaces `path` with `contents` via a temp file in the same directory.
fn write_atomic(path: &Path, contents: &str) -> Result<(), EmitError> {
    let io_err = |source| EmitError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn write_if_changed(path: &Path, contents: &str) -> Result<bool, EmitError> {
    match std::fs::read_to_string(path) {
        Ok(existing) if existing == contents => Ok(false),
        _ => write_atomic(path, contents).map(|()| true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{ReflectionBlock, UniformBlock};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn artifact(name: &str, words: Vec<u32>) -> CompiledArtifact {
        CompiledArtifact::new(
            words,
            ReflectionBlock {
                uniform_blocks: vec![UniformBlock {
                    name: "Globals".to_string(),
                    binding: 2,
                    size: 64,
                }],
                pipeline_inputs: 3,
                pipeline_outputs: 1,
            },
            ShaderStage::Vertex,
            name,
        )
    }

    #[test]
    fn symbol_prefixes() {
        assert_eq!(symbol_prefix("basic.vert"), "basic_vert_");
        assert_eq!(symbol_prefix("post-fx.frag"), "post_fx_frag_");
        assert_eq!(symbol_prefix("2d.comp"), "_2d_comp_");
        assert_eq!(symbol_prefix("ünï.vert"), "_n__vert_");
    }

    #[test]
    fn definition_layout() {
        let words: Vec<u32> = (0..10).collect();
        let text = render_definition(&artifact("basic.vert", words));

        let expected = "\
// Generated by glsl-hotreload. Do not modify.

#include \"basic.vert.h\"

static const unsigned basic_vert_prog[] = {
\t0x00000000, 0x00000001, 0x00000002, 0x00000003, 0x00000004, 0x00000005, 0x00000006, 0x00000007,
\t0x00000008, 0x00000009
};

static const char * const basic_vert_ubo_names[] = {
\t\"Globals\",
\t\"\"
};

static const ShaderUniformBlock basic_vert_ubos[] = {
\t{ 2, 64 },
\t{ 0, 0 }
};

SHADER_EXPORT const ShaderModule basic_vert_shader = {
\t\"basic.vert\",
\t\"main\",
\tbasic_vert_prog,
\tbasic_vert_ubo_names,
\tbasic_vert_ubos,
\t10,
\tSHADER_STAGE_VERTEX,
\t1,
\t3,
\t1
};
";
        assert_eq!(text, expected);
    }

    #[test]
    fn declaration_is_guarded() {
        let text = render_declaration(&artifact("basic.vert", vec![1]));
        assert!(text.contains("#ifndef BASIC_VERT_H_\n#define BASIC_VERT_H_"));
        assert!(text.contains("extern const ShaderModule basic_vert_shader;"));
        assert!(text.trim_end().ends_with("#endif"));
    }

    #[test]
    fn emit_writes_pair_and_reflection_header() {
        let tmp = TempDir::new().unwrap();
        let emitter = Emitter::new(tmp.path());
        emitter.emit(&artifact("basic.vert", vec![0x0723_0203])).unwrap();

        let [h, c] = emitter.output_paths("basic.vert");
        assert!(h.is_file());
        assert!(std::fs::read_to_string(&c).unwrap().contains("0x07230203"));
        assert!(tmp.path().join(REFLECTION_HEADER).is_file());

        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn manifest_lists_entries_once_in_order() {
        let tmp = TempDir::new().unwrap();
        let emitter = Emitter::new(tmp.path());
        let entries = vec!["b.frag".to_string(), "a.vert".to_string(), "b.frag".to_string()];

        assert!(emitter.write_manifest(&entries, false).unwrap());
        let source = std::fs::read_to_string(tmp.path().join("shaders.c")).unwrap();

        assert!(source.contains("const unsigned shader_count = 2;"));
        let a = source.find("&a_vert_shader").unwrap();
        let b = source.find("&b_frag_shader").unwrap();
        assert!(a < b);
        assert_eq!(source.matches("&b_frag_shader").count(), 1);
    }

    #[test]
    fn unchanged_manifest_is_not_rewritten() {
        let tmp = TempDir::new().unwrap();
        let emitter = Emitter::new(tmp.path());
        let entries = vec!["a.vert".to_string()];

        assert!(emitter.write_manifest(&entries, false).unwrap());
        assert!(!emitter.write_manifest(&entries, false).unwrap());
        assert!(emitter.write_manifest(&entries, true).unwrap());
        assert!(emitter.write_manifest(&[], false).unwrap());
    }

    #[test]
    fn remove_deletes_pair() {
        let tmp = TempDir::new().unwrap();
        let emitter = Emitter::new(tmp.path());
        emitter.emit(&artifact("old.vert", vec![1])).unwrap();

        assert!(emitter.remove("old.vert").unwrap());
        assert!(!emitter.remove("old.vert").unwrap());
        assert!(emitter.output_paths("old.vert").iter().all(|p| !p.exists()));
    }

    #[test]
    fn c_strings_are_escaped() {
        assert_eq!(c_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
