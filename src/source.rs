//! Include-aware source loading.
//!
//! A [`SourceLoader`] reads a module, follows every `#include` directive
//! against its search directories and records the resolved paths in
//! first-encountered order. Loaded headers are kept in an [`IncludeCache`]
//! that lives for one build session, so shared headers are read once and the
//! compiler's include callback is served from memory.

use crate::error::LoadError;
use crate::stage::ShaderStage;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Include chains deeper than this are reported as cyclic.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// A shader module ready for compilation.
#[derive(Debug, Clone)]
pub struct SourceModule {
    pub path: PathBuf,
    pub stage: ShaderStage,
    pub text: Arc<str>,
    /// Transitively included files, resolved, first-encountered order, no duplicates.
    pub includes: Vec<PathBuf>,
}

/// The file prepended to every compile unit.
///
/// Its path and its own includes count as dependencies of every module even
/// though no module includes it textually.
#[derive(Debug, Clone)]
pub struct ForceInclude {
    pub path: PathBuf,
    pub text: Arc<str>,
    pub includes: Vec<PathBuf>,
}

impl ForceInclude {
    pub fn dependencies(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.includes.iter().map(PathBuf::as_path))
    }
}

#[derive(Debug, Clone)]
struct CachedFile {
    text: Arc<str>,
    includes: Vec<PathBuf>,
}

/// Session-scoped cache of loaded include files.
///
/// Entries are keyed by resolved path, and additionally indexed by every name
/// they were written as in an `#include` directive.
#[derive(Debug, Default)]
pub struct IncludeCache {
    files: HashMap<PathBuf, CachedFile>,
    names: HashMap<String, PathBuf>,
}

impl IncludeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Text of a cached file by resolved path.
    pub fn text(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(|f| &*f.text)
    }

    /// Looks up an include by the name written in the directive.
    ///
    /// Returns the resolved path and the file's text.
    pub fn lookup(&self, name: &str) -> Option<(&Path, &str)> {
        let path = self.names.get(name)?;
        let file = self.files.get(path)?;
        Some((path.as_path(), &*file.text))
    }

    fn insert(&mut self, path: PathBuf, name: &str, text: Arc<str>, includes: Vec<PathBuf>) {
        self.names.entry(name.to_string()).or_insert_with(|| path.clone());
        self.files.insert(path, CachedFile { text, includes });
    }

    fn alias(&mut self, name: &str, path: &Path) {
        self.names
            .entry(name.to_string())
            .or_insert_with(|| path.to_path_buf());
    }
}

/// Resolves and loads shader sources against an ordered list of include directories.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    search_dirs: Vec<PathBuf>,
}

impl SourceLoader {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Resolves a file name.
    ///
    /// A name that exists as given wins; otherwise each search directory is
    /// tried in order and the first hit is returned.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let given = Path::new(name);
        if given.is_file() {
            return Some(normalize_path(given));
        }

        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .map(|found| normalize_path(&found))
    }

    /// Loads a file and everything it includes.
    ///
    /// Returns the file's text and its transitive include list. Every
    /// discovered header is added to `cache`.
    pub fn load(
        &self,
        path: &Path,
        cache: &mut IncludeCache,
    ) -> Result<(Arc<str>, Vec<PathBuf>), LoadError> {
        let path = normalize_path(path);
        let text = read_source(&path)?;
        let mut chain = vec![path.clone()];
        let mut includes = Vec::new();

        self.scan(&path, &text, cache, &mut chain, &mut includes)?;

        Ok((text, includes))
    }

    pub fn load_module(
        &self,
        path: &Path,
        stage: ShaderStage,
        cache: &mut IncludeCache,
    ) -> Result<SourceModule, LoadError> {
        let (text, includes) = self.load(path, cache)?;
        Ok(SourceModule {
            path: normalize_path(path),
            stage,
            text,
            includes,
        })
    }

    /// Resolves a force include name with the include search rules and loads it.
    pub fn load_force_include(
        &self,
        name: &Path,
        cache: &mut IncludeCache,
    ) -> Result<ForceInclude, LoadError> {
        let written = name.to_string_lossy();
        let path = self
            .resolve(&written)
            .ok_or_else(|| LoadError::IncludeNotFound {
                name: written.to_string(),
                from: PathBuf::from("<force include>"),
            })?;
        let (text, includes) = self.load(&path, cache)?;
        Ok(ForceInclude { path, text, includes })
    }

    fn scan(
        &self,
        path: &Path,
        text: &str,
        cache: &mut IncludeCache,
        chain: &mut Vec<PathBuf>,
        out: &mut Vec<PathBuf>,
    ) -> Result<(), LoadError> {
        for line in text.lines() {
            let name = match parse_include(line) {
                None => continue,
                Some(Ok(name)) => name,
                Some(Err(())) => {
                    return Err(LoadError::MalformedInclude {
                        path: path.to_path_buf(),
                        line: line.trim().to_string(),
                    });
                }
            };

            let resolved = self
                .resolve(name)
                .ok_or_else(|| LoadError::IncludeNotFound {
                    name: name.to_string(),
                    from: path.to_path_buf(),
                })?;

            if chain.contains(&resolved) {
                let mut cycle = chain.clone();
                cycle.push(resolved);
                return Err(LoadError::CyclicInclude { chain: cycle });
            }

            push_unique(out, resolved.clone());
            for nested in self.load_include(&resolved, name, cache, chain)? {
                push_unique(out, nested);
            }
        }

        Ok(())
    }

    /// Returns the transitive includes of `resolved`, reading it only on a cache miss.
    fn load_include(
        &self,
        resolved: &Path,
        name: &str,
        cache: &mut IncludeCache,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Vec<PathBuf>, LoadError> {
        if let Some(cached) = cache.files.get(resolved) {
            let includes = cached.includes.clone();
            cache.alias(name, resolved);
            return Ok(includes);
        }

        if chain.len() >= MAX_INCLUDE_DEPTH {
            let mut cycle = chain.clone();
            cycle.push(resolved.to_path_buf());
            return Err(LoadError::CyclicInclude { chain: cycle });
        }

        trace!(path = %resolved.display(), "loading include");
        let text = read_source(resolved)?;
        let mut nested = Vec::new();

        chain.push(resolved.to_path_buf());
        let scanned = self.scan(resolved, &text, cache, chain, &mut nested);
        chain.pop();
        scanned?;

        cache.insert(resolved.to_path_buf(), name, text, nested.clone());
        Ok(nested)
    }
}

fn read_source(path: &Path) -> Result<Arc<str>, LoadError> {
    std::fs::read_to_string(path)
        .map(Arc::from)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

/// Parses an include directive.
///
/// Returns `None` for lines that are not include directives and `Some(Err)`
/// for directives whose operand is missing or unterminated.
pub(crate) fn parse_include(line: &str) -> Option<Result<&str, ()>> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?;

    match rest.chars().next() {
        Some(c) if c.is_whitespace() || c == '"' || c == '<' => {}
        _ => return None,
    }

    let rest = rest.trim();
    let (open, close) = if rest.starts_with('"') {
        ('"', '"')
    } else if rest.starts_with('<') {
        ('<', '>')
    } else {
        return Some(Err(()));
    };

    let inner = &rest[open.len_utf8()..];
    match inner.find(close) {
        Some(end) if end > 0 => Some(Ok(&inner[..end])),
        _ => Some(Err(())),
    }
}

/// Makes a path absolute and removes `.` and `..` components without
/// touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}
