//! Discovery engine.
//!
//! Walks one level below each category root and turns every runnable
//! candidate into a `LaunchableUnit`. Pure apart from filesystem reads.

mod command;
pub mod describe;
pub mod markers;

use crate::error::ScanError;
use crate::model::{DiscoveryConfig, LaunchableUnit, UnitKind};
use std::fs;
use std::path::{Path, PathBuf};

const ENTRY_FILE: &str = "main.py";
const SCRIPT_EXT: &str = "py";
const ALWAYS_SKIPPED: &[&str] = &["__pycache__", "__init__.py"];

/// Scan the configured tree. Order: app roots first, then scripts areas,
/// each in file-name order.
pub fn scan(cfg: &DiscoveryConfig) -> Result<Vec<LaunchableUnit>, ScanError> {
    let root = cfg.root.as_path();
    fs::read_dir(root).map_err(|source| ScanError::Unreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut units = Vec::new();

    for area in &cfg.app_dirs {
        for dir in list_area(&root.join(area), cfg)? {
            if !dir.is_dir() {
                continue;
            }
            if let Some(unit) = analyze_app(cfg, &dir) {
                units.push(unit);
            }
        }
    }

    for area in &cfg.script_dirs {
        for file in list_area(&root.join(area), cfg)? {
            let is_script = file.is_file()
                && file.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXT);
            if !is_script {
                continue;
            }
            if let Some(unit) = analyze_script(cfg, &file) {
                units.push(unit);
            }
        }
    }

    tracing::info!(count = units.len(), root = %root.display(), "discovery finished");
    Ok(units)
}

/// Sorted entries of a category root. A missing root is empty, not an error.
fn list_area(area: &Path, cfg: &DiscoveryConfig) -> Result<Vec<PathBuf>, ScanError> {
    if !area.exists() {
        return Ok(Vec::new());
    }
    let unreadable = |source| ScanError::Unreadable {
        path: area.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(area).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let name: &str = &name;
        if name.starts_with('.')
            || ALWAYS_SKIPPED.contains(&name)
            || cfg.exclude.iter().any(|e| e == name)
        {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn analyze_app(cfg: &DiscoveryConfig, dir: &Path) -> Option<LaunchableUnit> {
    let entry = dir.join(ENTRY_FILE);
    if !entry.is_file() {
        tracing::debug!(dir = %dir.display(), "no entry point, skipped");
        return None;
    }
    let content = read_entry(&entry)?;
    let found = markers::sniff(&content, Some(dir), false);
    let kind = markers::classify(&found)?;
    let rel = relative_id(&cfg.root, dir);
    let asgi = markers::is_asgi_app(&content);

    Some(build_unit(cfg, rel, display_name(dir), kind, entry, &content, false, asgi))
}

fn analyze_script(cfg: &DiscoveryConfig, file: &Path) -> Option<LaunchableUnit> {
    let content = read_entry(file)?;
    let found = markers::sniff(&content, None, true);
    let kind = markers::classify(&found)?;
    let rel = relative_id(&cfg.root, file);
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel.clone());

    Some(build_unit(cfg, rel, name, kind, file.to_path_buf(), &content, true, false))
}

#[allow(clippy::too_many_arguments)]
fn build_unit(
    cfg: &DiscoveryConfig,
    id: String,
    display_name: String,
    kind: UnitKind,
    path: PathBuf,
    content: &str,
    standalone: bool,
    asgi: bool,
) -> LaunchableUnit {
    tracing::debug!(%id, %kind, "classified");
    LaunchableUnit {
        launch_command: command::launch_command(cfg, &id, kind, standalone, asgi),
        port: (kind == UnitKind::Web)
            .then(|| describe::extract_port(content))
            .flatten(),
        description: describe::extract_description(content),
        id,
        display_name,
        kind,
        path,
    }
}

/// Unreadable entry files skip the candidate instead of failing the scan.
fn read_entry(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
            None
        }
    }
}

fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
