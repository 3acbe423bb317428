use crate::builder::{ShaderWatcherBuilder, WatchConfig};
use crate::compile::ShaderCompiler;
use crate::emit::Emitter;
use crate::error::{ConfigError, WatchError};
use crate::native::remove_library;
use crate::process;
use crate::session::run_build;
use crate::snapshot::{ChangeSet, WatchSnapshot};
use crate::stage::is_shader_module;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often idle loops check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Who performs the shader build step.
#[derive(Clone)]
pub enum ShaderTool {
    /// Build in this process with the given compiler.
    InProcess(Arc<dyn ShaderCompiler>),
    /// Spawn an executable accepting this crate's `build` command line.
    External(PathBuf),
}

impl fmt::Debug for ShaderTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderTool::InProcess(_) => f.write_str("InProcess"),
            ShaderTool::External(path) => f.debug_tuple("External").field(path).finish(),
        }
    }
}

/// A recursive watch on one directory that turns bursts of file system
/// events into snapshot diffs.
struct DirWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
    changes: Receiver<Result<ChangeSet, WatchError>>,
}

impl DirWatcher {
    /// Takes the baseline snapshot and starts watching.
    fn arm(dir: &Path, debounce: Duration) -> Result<Self, WatchError> {
        let dir = dir.to_path_buf();
        let baseline = WatchSnapshot::scan(&dir).map_err(|source| WatchError::Snapshot {
            path: dir.clone(),
            source,
        })?;

        let (event_tx, event_rx) = channel::<notify::Result<Event>>();
        let notify_err = |source: notify::Error| WatchError::Notify {
            path: dir.clone(),
            source,
        };
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            Config::default().with_poll_interval(debounce),
        )
        .map_err(notify_err)?;
        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(notify_err)?;

        let (change_tx, change_rx) = channel();
        let thread_dir = dir.clone();
        thread::Builder::new()
            .name(format!("diff {}", dir.display()))
            .spawn(move || diff_loop(&thread_dir, baseline, &event_rx, &change_tx, debounce))
            .map_err(|source| WatchError::Thread {
                path: dir.clone(),
                source,
            })?;

        info!("Watching: {}", dir.display());
        Ok(Self {
            _watcher: watcher,
            dir,
            changes: change_rx,
        })
    }

    /// Waits up to `timeout` for the next non-empty change set.
    fn next(&self, timeout: Duration) -> Result<Option<ChangeSet>, WatchError> {
        match self.changes.recv_timeout(timeout) {
            Ok(Ok(changes)) => Ok(Some(changes)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::ChannelClosed(self.dir.clone())),
        }
    }
}

/// Blocks for a wake event, lets the burst settle, then diffs a fresh
/// snapshot against the previous one.
fn diff_loop(
    dir: &Path,
    mut previous: WatchSnapshot,
    events: &Receiver<notify::Result<Event>>,
    changes: &Sender<Result<ChangeSet, WatchError>>,
    debounce: Duration,
) {
    let fail = |e: WatchError| {
        let _ = changes.send(Err(e));
    };

    loop {
        match events.recv() {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                return fail(WatchError::Notify {
                    path: dir.to_path_buf(),
                    source,
                });
            }
            Err(_) => return fail(WatchError::ChannelClosed(dir.to_path_buf())),
        }

        thread::sleep(debounce);
        loop {
            match events.try_recv() {
                Ok(Ok(_)) => continue,
                Ok(Err(source)) => {
                    return fail(WatchError::Notify {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return fail(WatchError::ChannelClosed(dir.to_path_buf()));
                }
            }
        }

        let current = match WatchSnapshot::scan(dir) {
            Ok(snapshot) => snapshot,
            Err(source) => {
                return fail(WatchError::Snapshot {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };
        let diff = previous.diff(&current);
        previous = current;

        if diff.is_empty() {
            continue;
        }
        debug!(
            dir = %dir.display(),
            added = diff.added.len(),
            deleted = diff.deleted.len(),
            modified = diff.modified.len(),
            "changes detected"
        );
        if changes.send(Ok(diff)).is_err() {
            return;
        }
    }
}

/// Watches a shader tree and keeps generated sources and native libraries
/// up to date.
///
/// Two loops run on their own threads. The shader loop rebuilds generated C
/// sources when shader sources change; the generated loop compiles changed C
/// sources into shared libraries and raises the reload signal.
pub struct ShaderWatcher {
    reload_receiver: Mutex<Receiver<()>>,
    shutdown: Arc<AtomicBool>,
    loops: Vec<JoinHandle<Result<(), WatchError>>>,
}

impl ShaderWatcher {
    /// Creates a builder for customizing watcher configuration.
    pub fn builder(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> ShaderWatcherBuilder {
        ShaderWatcherBuilder::new(input_dir, output_dir)
    }

    pub(crate) fn new_with_config(config: WatchConfig) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let (reload_tx, reload_rx) = channel();

        // The generated loop must see the initial build's output.
        let generated = DirWatcher::arm(&config.intermediate_dir, config.debounce)?;
        let shaders = DirWatcher::arm(&config.input_dir, config.debounce)?;

        info!("Performing initial shader build...");
        run_shader_tool(&config, config.clean_rebuild)?;
        info!("Initial shader build complete");

        let shutdown = Arc::new(AtomicBool::new(false));
        let generated_loop = spawn_loop("generated loop", generated, &config, &shutdown, {
            let config = config.clone();
            move |changes| {
                if handle_generated_changes(&config, changes) {
                    let _ = reload_tx.send(());
                }
            }
        })?;
        let shader_loop = spawn_loop("shader loop", shaders, &config, &shutdown, {
            let config = config.clone();
            move |changes| handle_shader_changes(&config, changes)
        })?;

        info!("Shader hot reloading enabled");
        Ok(Self {
            reload_receiver: Mutex::new(reload_rx),
            shutdown,
            loops: vec![generated_loop, shader_loop],
        })
    }

    /// Checks if libraries have been rebuilt since the last check.
    ///
    /// Returns true if a reload is available, false otherwise.
    /// This method is non-blocking and can be called frequently.
    #[inline]
    pub fn check_for_reload(&self) -> bool {
        let receiver = self.reload_receiver.lock();
        // Drain all pending reload signals and return true if any were present
        let mut has_reload = false;
        while receiver.try_recv().is_ok() {
            has_reload = true;
        }
        has_reload
    }

    /// Blocks until both loops have stopped.
    ///
    /// Loops only stop on a fatal watch error, so this normally never
    /// returns. The first error is returned after both loops finished.
    pub fn wait(mut self) -> Result<(), WatchError> {
        let mut first = None;
        for handle in std::mem::take(&mut self.loops) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first.get_or_insert(e);
                }
                Err(_) => error!("watch loop panicked"),
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for ShaderWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn spawn_loop(
    name: &str,
    watcher: DirWatcher,
    config: &WatchConfig,
    shutdown: &Arc<AtomicBool>,
    mut handle: impl FnMut(&ChangeSet) + Send + 'static,
) -> Result<JoinHandle<Result<(), WatchError>>, WatchError> {
    let debounce = config.debounce;
    let shutdown = shutdown.clone();
    let loop_name = name.to_string();

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = (|| -> Result<(), WatchError> {
                while !shutdown.load(Ordering::Relaxed) {
                    let Some(changes) = watcher.next(POLL_INTERVAL)? else {
                        continue;
                    };
                    handle(&changes);
                    thread::sleep(debounce);
                }
                Ok(())
            })();
            if let Err(e) = &result {
                error!("{loop_name} stopped: {e}");
            }
            result
        })
        .map_err(|source| WatchError::Thread {
            path: PathBuf::from(name),
            source,
        })
}

/// Reacts to a shader tree diff: deleted modules lose their generated pair,
/// then one build session runs over the whole tree.
pub(crate) fn handle_shader_changes(config: &WatchConfig, changes: &ChangeSet) {
    let emitter = Emitter::new(&config.intermediate_dir);
    for path in changes.deleted.iter().filter(|p| is_shader_module(p)) {
        let name = file_name(path);
        match emitter.remove(&name) {
            Ok(true) => info!("Removed generated sources for {name}"),
            Ok(false) => {}
            Err(e) => error!("{e}"),
        }
    }

    info!("Shader sources changed, rebuilding...");
    if let Err(e) = run_shader_tool(config, false) {
        error!("{e}");
    }
}

/// Reacts to a generated tree diff. Returns true if any library was built
/// or removed.
pub(crate) fn handle_generated_changes(config: &WatchConfig, changes: &ChangeSet) -> bool {
    let mut changed = false;

    for path in changes.deleted.iter().filter(|p| is_c_source(p)) {
        match remove_library(path, &config.output_dir) {
            Ok(true) => {
                info!("Removed library for {}", file_name(path));
                changed = true;
            }
            Ok(false) => {}
            Err(e) => error!(source = %path.display(), "failed to remove library: {e}"),
        }
    }

    for path in changes.touched().filter(|p| is_c_source(p)) {
        info!("Compiling {}", file_name(path));
        match config.native.compile_to_library(path, &config.output_dir) {
            Ok(library) => {
                info!("Built {}", library.display());
                changed = true;
            }
            Err(e) => error!(source = %path.display(), "{e}"),
        }
    }

    changed
}

/// Runs one shader build over the input tree.
///
/// Only an in-process configuration failure is returned; an external tool's
/// failures are logged.
fn run_shader_tool(config: &WatchConfig, force: bool) -> Result<(), ConfigError> {
    match &config.shader_tool {
        ShaderTool::InProcess(compiler) => {
            run_build(&config.build.with_force(force), compiler.as_ref())?;
        }
        ShaderTool::External(program) => {
            match process::run(program, external_args(config, force)) {
                Ok(out) => {
                    for line in out.output.lines().filter(|l| !l.trim().is_empty()) {
                        info!("{line}");
                    }
                    if !out.success() {
                        warn!(
                            "{} exited with {}",
                            program.display(),
                            out.code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
                        );
                    }
                }
                Err(e) => error!("{e}"),
            }
        }
    }
    Ok(())
}

/// Command line for an external shader tool.
fn external_args(config: &WatchConfig, force: bool) -> Vec<OsString> {
    let build = &config.build;
    let mut args: Vec<OsString> = vec!["build".into(), "-O".into(), build.output_dir().into()];
    for dir in build.include_dirs() {
        args.push("-I".into());
        args.push(dir.into());
    }
    if let Some(force_include) = build.force_include() {
        args.push("-F".into());
        args.push(force_include.into());
    }
    for (name, value) in build.defines() {
        args.push("-D".into());
        args.push(format!("{name}={value}").into());
    }
    if force {
        args.push("--force".into());
    }
    args.push(config.input_dir.as_os_str().into());
    args
}

fn is_c_source(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("c"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
