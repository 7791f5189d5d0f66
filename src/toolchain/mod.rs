// ─────────────────────────────────────────────────────────────────────────────
//  ino :: toolchain
//
//  The compiler, archiver and linker are opaque external processes.  The
//  rest of the engine only ever talks to them through the `Toolchain`
//  trait; `Gcc` is the real implementation driving avr-gcc & friends.
// ─────────────────────────────────────────────────────────────────────────────

pub mod cache;
pub mod gcc;

use std::path::{Path, PathBuf};

use crate::error::Result;

pub use gcc::Gcc;

/// Absolute paths of the binaries a build runs.  Resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolchainPaths {
    pub cc:      PathBuf,
    pub cxx:     PathBuf,
    pub ar:      PathBuf,
    pub objcopy: PathBuf,
    /// `avr-size`, when the distribution has one.
    pub size:    Option<PathBuf>,
}

/// Flag sets, already split into argv words.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flags {
    /// Preprocessor + code generation flags shared by C, C++ and assembly.
    pub cppflags: Vec<String>,
    pub cflags:   Vec<String>,
    pub cxxflags: Vec<String>,
    pub ldflags:  Vec<String>,
}

pub trait Toolchain {
    /// Write a makefile-rule dependency listing (`target: header …`) for
    /// every file in `sources` into `output`.  `src_dir` is the directory
    /// being scanned and only serves diagnostics.
    fn emit_deps(&self, src_dir: &Path, sources: &[PathBuf], inc_flags: &[String], output: &Path) -> Result<()>;

    /// Compile `sources` into objects inside `obj_dir`.  Returns the object
    /// paths in source order.
    fn compile(&self, sources: &[PathBuf], obj_dir: &Path, inc_flags: &[String]) -> Result<Vec<PathBuf>>;

    /// Pack `objects` into the static library `archive`.
    fn archive(&self, archive: &Path, objects: &[PathBuf]) -> Result<()>;

    /// Link `objects` followed by `archives` (in the given order) into `elf`.
    fn link(&self, objects: &[PathBuf], archives: &[PathBuf], elf: &Path) -> Result<()>;

    /// Convert the linked image into a flashable Intel HEX file.
    fn objcopy(&self, elf: &Path, hex: &Path) -> Result<()>;

    /// Human-readable memory usage of `elf`, if the toolchain can tell.
    fn size_report(&self, _elf: &Path) -> Option<String> {
        None
    }
}
