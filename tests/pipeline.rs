mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{FakeCompiler, future, past, set_time, write};
use glsl_hotreload::{BuildConfig, BuildError, BuildReport, ConfigError, GlslCompiler, run_build};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Project {
    _tmp: TempDir,
    src: PathBuf,
    out: PathBuf,
}

impl Project {
    /// `a.vert` and `b.frag` include `common.h`; `c.comp` does not.
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("shaders");
        let out = tmp.path().join("generated");

        write(&src.join("common.h"), "#define COMMON 1\n");
        write(
            &src.join("a.vert"),
            "#include \"common.h\"\nvoid main() { gl_Position = vec4(COMMON); }\n",
        );
        write(
            &src.join("b.frag"),
            "#include \"common.h\"\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(COMMON); }\n",
        );
        write(&src.join("c.comp"), "layout(local_size_x = 1) in;\nvoid main() {}\n");
        write(&src.join("prelude.glsl"), "#version 450\n");
        for name in ["common.h", "a.vert", "b.frag", "c.comp", "prelude.glsl"] {
            set_time(&src.join(name), past());
        }

        Self { _tmp: tmp, src, out }
    }

    fn config(&self) -> BuildConfig {
        BuildConfig::builder(&self.out)
            .input(&self.src)
            .include_dir(&self.src)
            .force_include("prelude.glsl")
            .build()
            .unwrap()
    }

    fn build(&self, compiler: &FakeCompiler) -> BuildReport {
        compiler.reset();
        run_build(&self.config(), compiler).unwrap()
    }

    fn generated(&self, name: &str) -> String {
        fs::read_to_string(self.out.join(name)).unwrap()
    }

    fn manifest(&self) -> String {
        self.generated("shaders.c")
    }
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();
    names
}

#[test]
fn first_build_compiles_everything() {
    let project = Project::new();
    let compiler = FakeCompiler::default();

    let report = project.build(&compiler);

    assert_eq!(report.exit_code(), 0);
    assert_eq!(sorted(&report.built), ["a.vert", "b.frag", "c.comp"]);
    assert!(report.manifest_written);
    for name in ["a.vert", "b.frag", "c.comp"] {
        assert!(project.out.join(format!("{name}.h")).is_file());
        assert!(project.out.join(format!("{name}.c")).is_file());
    }
    assert!(project.out.join("shader_reflection.h").is_file());

    let manifest = project.manifest();
    assert!(manifest.contains("const unsigned shader_count = 3;"));
    assert!(manifest.contains("&a_vert_shader,"));
    assert!(manifest.contains("&c_comp_shader,"));
}

#[test]
fn second_run_without_changes_rebuilds_nothing() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    project.build(&compiler);

    let report = project.build(&compiler);

    assert!(compiler.compiled().is_empty());
    assert!(report.built.is_empty());
    assert_eq!(sorted(&report.up_to_date), ["a.vert", "b.frag", "c.comp"]);
    assert!(!report.manifest_written);
}

#[test]
fn touching_a_shared_header_rebuilds_only_its_includers() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    project.build(&compiler);

    set_time(&project.src.join("common.h"), future());
    let report = project.build(&compiler);

    assert_eq!(compiler.compiled(), ["a.vert", "b.frag"]);
    assert_eq!(report.up_to_date, ["c.comp"]);
}

#[test]
fn touching_the_force_include_rebuilds_every_module() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    project.build(&compiler);

    set_time(&project.src.join("prelude.glsl"), future());
    project.build(&compiler);

    assert_eq!(compiler.compiled(), ["a.vert", "b.frag", "c.comp"]);
}

#[test]
fn missing_output_half_forces_rebuild() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    project.build(&compiler);

    fs::remove_file(project.out.join("c.comp.h")).unwrap();
    project.build(&compiler);

    assert_eq!(compiler.compiled(), ["c.comp"]);
    assert!(project.out.join("c.comp.h").is_file());
}

#[test]
fn forced_builds_are_byte_identical() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    let forced = project.config().with_force(true);

    run_build(&forced, &compiler).unwrap();
    let first = project.generated("a.vert.c");
    let first_header = project.generated("a.vert.h");

    let report = run_build(&forced, &compiler).unwrap();
    assert_eq!(report.built.len(), 3);
    assert_eq!(project.generated("a.vert.c"), first);
    assert_eq!(project.generated("a.vert.h"), first_header);
    assert!(first.contains("a_vert_"));
}

#[test]
fn failing_module_is_reported_and_left_out_of_the_manifest() {
    let project = Project::new();
    write(&project.src.join("b.frag"), "BROKEN\n");
    set_time(&project.src.join("b.frag"), past());
    let compiler = FakeCompiler::default();

    let report = project.build(&compiler);

    assert_eq!(report.exit_code(), -1);
    assert_eq!(sorted(&report.built), ["a.vert", "c.comp"]);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.path().file_name().unwrap(), "b.frag");
    assert!(matches!(failure, BuildError::Compile { .. }));
    assert!(failure.to_string().contains("syntax error"));

    let manifest = project.manifest();
    assert!(manifest.contains("const unsigned shader_count = 2;"));
    assert!(!manifest.contains("b_frag_"));
    assert!(!project.out.join("b.frag.c").exists());
}

#[test]
fn missing_include_fails_only_that_module() {
    let project = Project::new();
    write(&project.src.join("d.vert"), "#include \"nowhere.h\"\nvoid main() {}\n");
    let compiler = FakeCompiler::default();

    let report = project.build(&compiler);

    assert_eq!(report.exit_code(), -1);
    assert!(matches!(report.failures[0], BuildError::Load { .. }));
    assert_eq!(report.built.len(), 3);
}

#[test]
fn removed_source_drops_out_of_the_manifest() {
    let project = Project::new();
    let compiler = FakeCompiler::default();
    project.build(&compiler);

    fs::remove_file(project.src.join("c.comp")).unwrap();
    let report = project.build(&compiler);

    assert!(report.manifest_written);
    assert!(!project.manifest().contains("c_comp_"));
    assert!(project.manifest().contains("const unsigned shader_count = 2;"));
}

#[test]
fn unresolvable_force_include_is_fatal() {
    let project = Project::new();
    let config = BuildConfig::builder(&project.out)
        .input(&project.src)
        .include_dir(&project.src)
        .force_include("missing_prelude.glsl")
        .build()
        .unwrap();

    let err = run_build(&config, &FakeCompiler::default()).unwrap_err();
    assert!(matches!(err, ConfigError::ForceInclude { .. }));
}

#[test]
fn glsl_compiler_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("shaders");
    let out = tmp.path().join("generated");
    write(
        &src.join("transform.glsl"),
        "layout(set = 0, binding = 0) uniform Globals { mat4 view_proj; } globals;\n",
    );
    write(
        &src.join("basic.vert"),
        "#version 450\n#include \"transform.glsl\"\nlayout(location = 0) in vec3 position;\n\
         layout(location = 0) out vec3 color;\n\
         void main() { color = position; gl_Position = globals.view_proj * vec4(position, 1.0); }\n",
    );

    let config = BuildConfig::builder(&out)
        .input(&src)
        .include_dir(&src)
        .build()
        .unwrap();
    let report = run_build(&config, &GlslCompiler::new()).unwrap();

    assert_eq!(report.exit_code(), 0, "{:?}", report.failures);
    let definition = fs::read_to_string(out.join("basic.vert.c")).unwrap();
    assert!(definition.contains("0x07230203"));
    assert!(definition.contains("SHADER_STAGE_VERTEX"));
    assert!(Path::new(&out.join("shaders.h")).is_file());
}
