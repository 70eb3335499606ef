//! Runtime Environment Discovery
//!
//! Locates a Python installation the embedded backend can run on.
//! Search order: explicit override, environment bundled next to the
//! application, conventional virtual environments in the application
//! directory or its parents, and finally a system-wide Python 3.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::backend::config::{app_dir, RuntimeSettings, RUNTIME_HOME_ENV};
use crate::backend::error::BridgeError;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Environment directory names searched next to the application and its parents
const ENV_DIR_NAMES: [&str; 2] = [".venv", "venv"];

/// Where a runtime environment was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Override,
    Bundled,
    ParentSearch,
    System,
}

/// A discovered runtime installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub root: PathBuf,
    pub executable: PathBuf,
    /// Appended to the runtime's module search path
    pub library_paths: Vec<PathBuf>,
    pub source: DiscoverySource,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Environment root or runtime binary
    pub override_path: Option<PathBuf>,
    pub app_dir: PathBuf,
    /// Parent directories to walk above `app_dir`
    pub search_depth: usize,
    /// Commands tried for the system-wide fallback
    pub system_candidates: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            override_path: None,
            app_dir: app_dir(),
            search_depth: 3,
            system_candidates: vec!["python3".to_string(), "python".to_string()],
        }
    }
}

impl DiscoveryOptions {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            override_path: settings.home.clone(),
            search_depth: settings.search_depth,
            ..Self::default()
        }
    }
}

/// Find a runtime environment. The first match wins.
pub fn discover(options: &DiscoveryOptions) -> Result<RuntimeEnvironment, BridgeError> {
    let found = options
        .override_path
        .as_deref()
        .and_then(from_override)
        .map(|exe| (exe, DiscoverySource::Override))
        .or_else(|| bundled(&options.app_dir).map(|exe| (exe, DiscoverySource::Bundled)))
        .or_else(|| {
            search_parents(&options.app_dir, options.search_depth)
                .map(|exe| (exe, DiscoverySource::ParentSearch))
        })
        .or_else(|| {
            find_system_python(&options.system_candidates).map(|exe| (exe, DiscoverySource::System))
        });

    let Some((executable, source)) = found else {
        log::error!("[Bridge] No Python runtime found");
        return Err(BridgeError::RuntimeNotFound(RUNTIME_HOME_ENV));
    };

    let root = env_root(&executable);
    let mut library_paths = Vec::new();
    if source != DiscoverySource::System {
        library_paths.extend(site_packages(&root));
    }
    library_paths.push(options.app_dir.clone());

    log::info!("[Bridge] Using {:?} runtime at {:?}", source, executable);
    Ok(RuntimeEnvironment {
        root,
        executable,
        library_paths,
        source,
    })
}

fn from_override(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.is_dir() {
        if let Some(exe) = env_binary(path) {
            return Some(exe);
        }
    }
    log::warn!("[Bridge] Runtime override {:?} is not a Python environment, ignoring", path);
    None
}

/// Self-contained environment shipped next to the executable
fn bundled(app_dir: &Path) -> Option<PathBuf> {
    let name = if cfg!(target_os = "windows") { "python-embed" } else { "python-venv" };
    env_binary(&app_dir.join(name))
}

/// Look for `.venv`/`venv` in `app_dir` and up to `depth` parents
fn search_parents(app_dir: &Path, depth: usize) -> Option<PathBuf> {
    app_dir.ancestors().take(depth + 1).find_map(|dir| {
        ENV_DIR_NAMES
            .iter()
            .find_map(|name| env_binary(&dir.join(name)))
    })
}

/// Runtime binary inside an environment root, if the layout matches
pub fn env_binary(root: &Path) -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &["python.exe", "Scripts/python.exe"]
    } else {
        &["bin/python3", "bin/python"]
    };

    candidates
        .iter()
        .map(|rel| root.join(rel))
        .find(|path| path.is_file())
}

/// Environment root for a runtime binary (`<root>/bin/python` → `<root>`)
fn env_root(executable: &Path) -> PathBuf {
    let parent = executable.parent().unwrap_or(Path::new("."));
    match parent.file_name().and_then(|n| n.to_str()) {
        Some("bin") | Some("Scripts") => parent.parent().unwrap_or(parent).to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

/// `site-packages` directory of an environment
fn site_packages(root: &Path) -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        let sp = root.join("Lib").join("site-packages");
        return sp.is_dir().then_some(sp);
    }

    let entries = fs::read_dir(root.join("lib")).ok()?;
    entries.flatten().find_map(|entry| {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("python3.") {
            return None;
        }
        let sp = entry.path().join("site-packages");
        sp.is_dir().then_some(sp)
    })
}

/// Find a usable system-wide Python 3.
///
/// Each candidate is run with `--version` (console hidden on Windows) and
/// must report Python 3.
pub fn find_system_python(candidates: &[String]) -> Option<PathBuf> {
    for name in candidates {
        if !reports_python3(name) {
            continue;
        }
        return Some(resolve_executable(name).unwrap_or_else(|| PathBuf::from(name)));
    }
    None
}

fn reports_python3(program: &str) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    match cmd.output() {
        Ok(output) if output.status.success() => {
            // Python 2 prints its version to stderr
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            combined.contains("Python 3")
        }
        _ => false,
    }
}

/// Resolve an executable name to its full path using `which` (Unix) or `where` (Windows).
fn resolve_executable(name: &str) -> Option<PathBuf> {
    let finder = if cfg!(target_os = "windows") { "where" } else { "which" };

    let mut cmd = Command::new(finder);
    cmd.arg(name).stdout(Stdio::piped()).stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    (!first.is_empty()).then(|| PathBuf::from(first))
}
