//! Command-line front end: one-shot `build` and long-running `watch`.

use clap::{Args, Parser, Subcommand};
use glsl_hotreload::{BuildConfig, ConfigError, GlslCompiler, ShaderWatcher, run_build};
use std::path::PathBuf;
use std::process;
use tracing::error;

/// Exit status when the force include cannot be loaded.
const FORCE_INCLUDE_FAILED: i32 = -101;

#[derive(Parser, Debug)]
#[command(name = "glsl-hotreload", version, about = "Incremental GLSL to SPIR-V builder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile shaders into C sources and refresh the manifest.
    Build(BuildArgs),
    /// Watch a shader tree and rebuild sources and native libraries on change.
    Watch(WatchArgs),
}

/// Options shared by both subcommands.
#[derive(Args, Debug)]
struct CompilerArgs {
    /// Include search directory. Searched in the order given.
    #[arg(short = 'I', value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// File prepended to every shader.
    #[arg(short = 'F', value_name = "FILE")]
    force_include: Option<PathBuf>,

    /// Preprocessor definition passed to the compiler.
    #[arg(short = 'D', value_name = "NAME[=VALUE]", value_parser = parse_define)]
    defines: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    compiler: CompilerArgs,

    /// Directory receiving the generated C sources.
    #[arg(short = 'O', value_name = "DIR")]
    output_dir: PathBuf,

    /// Rebuild every shader regardless of timestamps.
    #[arg(long)]
    force: bool,

    /// Shader files or directories scanned recursively.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[command(flatten)]
    compiler: CompilerArgs,

    /// Directory receiving the generated C sources.
    #[arg(short = 'i', value_name = "DIR", default_value = ".")]
    intermediate_dir: PathBuf,

    /// Rebuild every shader on start.
    #[arg(short = 'R')]
    clean_rebuild: bool,

    /// Run shader builds through this executable instead of in-process.
    #[arg(long, value_name = "PATH")]
    shader_tool: Option<PathBuf>,

    /// C compiler used for the native step.
    #[arg(long, value_name = "PATH", default_value = "cc")]
    native_compiler: PathBuf,

    #[arg(long, value_name = "N", default_value_t = 100)]
    debounce_ms: u64,

    /// Shader source tree.
    input_dir: PathBuf,

    /// Directory receiving the shared libraries.
    output_dir: PathBuf,
}

fn parse_define(arg: &str) -> Result<(String, String), String> {
    let (name, value) = arg.split_once('=').unwrap_or((arg, "1"));
    if name.is_empty() {
        return Err(format!("invalid definition \"{arg}\""));
    }
    Ok((name.to_string(), value.to_string()))
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Build(args) => build(args),
        Command::Watch(args) => watch(args),
    };
    process::exit(code);
}

fn build(args: BuildArgs) -> i32 {
    let mut builder = BuildConfig::builder(&args.output_dir).force(args.force);
    for input in &args.inputs {
        builder = builder.input(input);
    }
    for dir in &args.compiler.include_dirs {
        builder = builder.include_dir(dir);
    }
    if let Some(path) = &args.compiler.force_include {
        builder = builder.force_include(path);
    }
    for (name, value) in args.compiler.defines {
        builder = builder.define(name, value);
    }

    let result = builder
        .build()
        .and_then(|config| run_build(&config, &GlslCompiler::new()));
    match result {
        Ok(report) => report.exit_code(),
        Err(e) => config_failure(&e),
    }
}

fn watch(args: WatchArgs) -> i32 {
    let mut builder = ShaderWatcher::builder(&args.input_dir, &args.output_dir)
        .intermediate_dir(&args.intermediate_dir)
        .clean_rebuild(args.clean_rebuild)
        .native_compiler(&args.native_compiler)
        .debounce_ms(args.debounce_ms);
    if let Some(tool) = &args.shader_tool {
        builder = builder.shader_tool(tool);
    }
    for dir in &args.compiler.include_dirs {
        builder = builder.include_dir(dir);
    }
    if let Some(path) = &args.compiler.force_include {
        builder = builder.force_include(path);
    }
    for (name, value) in args.compiler.defines {
        builder = builder.define(name, value);
    }

    let watcher = match builder.build() {
        Ok(watcher) => watcher,
        Err(e) => return config_failure(&e),
    };
    match watcher.wait() {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

fn config_failure(e: &ConfigError) -> i32 {
    error!("{e}");
    match e {
        ConfigError::ForceInclude { .. } => FORCE_INCLUDE_FAILED,
        _ => 1,
    }
}
