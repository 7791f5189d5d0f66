// ─────────────────────────────────────────────────────────────────────────────
//  ino :: fsquery
//
//  The only file-system questions the engine asks: "which subdirectories
//  does X have" and "which sources live under X".  Hidden entries are never
//  reported.  A missing directory simply has no children.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into when looking for library headers
/// or library sources.
pub const EXCLUDED_DIRS: &[&str] = &["examples"];

/// Extensions of sketch files that go through the preprocessor.
pub const SKETCH_EXTS: &[&str] = &["ino", "pde"];

/// Extensions the toolchain compiles directly.
pub const NATIVE_EXTS: &[&str] = &["c", "cpp", "cc", "S"];

/// Subdirectories of `dir`, sorted by name.
///
/// With `recursive` every level is listed, parents before their children.
/// Any directory whose name is in `exclude` is skipped together with its
/// whole subtree.
pub fn list_subdirs(dir: &Path, recursive: bool, exclude: &[&str]) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    walker
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !is_excluded(e, exclude))
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Source files with one of `exts` inside `dir`, sorted by path.
///
/// Library sources may sit in `src/` or `utility/` subfolders, so the walk
/// is recursive, but `EXCLUDED_DIRS` are never entered.
pub fn list_sources(dir: &Path, exts: &[&str], recursive: bool) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !is_excluded(e, EXCLUDED_DIRS))
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_ext(e.path(), exts))
        .map(|e| e.into_path())
        .collect()
}

/// True if `path` names an existing file or directory.
pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn has_ext(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.contains(&e))
        .unwrap_or(false)
}

fn is_hidden(e: &DirEntry) -> bool {
    e.depth() > 0 && e.file_name().to_string_lossy().starts_with('.')
}

fn is_excluded(e: &DirEntry, exclude: &[&str]) -> bool {
    e.depth() > 0
        && e.file_type().is_dir()
        && exclude.iter().any(|x| e.file_name() == *x)
}
