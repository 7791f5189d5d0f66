// ─────────────────────────────────────────────────────────────────────────────
//  ino :: toolchain :: gcc
//
//  Drives avr-gcc / avr-g++ / avr-ar / avr-objcopy as child processes.
//
//    .c          → cc   cppflags -I… cflags
//    .cpp .cc    → cxx  cppflags -I… cxxflags
//    .S          → cc   -x assembler-with-cpp cppflags -I…
//    .ino .pde   → cxx  -x c++ cppflags -I… cxxflags   (dependency scan only)
//
//  Sources within one compile call are built in parallel (rayon); a failed
//  source never stops its siblings, every diagnostic is reported together.
//  Each compile also writes a `-MMD` listing next to the object so the cache
//  can tell when an included header changed.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rayon::prelude::*;
use tracing::debug;

use crate::deps::parse_listing;
use crate::error::{Abort, Result};
use super::cache::{dep_path, hash_str, obj_name, obj_path, CacheManifest};
use super::{Flags, Toolchain, ToolchainPaths};

enum Outcome {
    Cached,
    Built,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Gcc {
    pub tools: ToolchainPaths,
    pub flags: Flags,
    /// Target MCU, used for the `--format=avr` size report.
    pub mcu:   Option<String>,
}

impl Gcc {
    pub fn new(tools: ToolchainPaths, flags: Flags) -> Self {
        Self { tools, flags, mcu: None }
    }

    pub fn with_mcu(mut self, mcu: impl Into<String>) -> Self {
        self.mcu = Some(mcu.into());
        self
    }

    /// Compiler invocation for `src` up to (not including) the mode flags.
    fn command_for(&self, src: &Path, inc_flags: &[String]) -> Command {
        let ext = src.extension().and_then(|e| e.to_str()).unwrap_or("");
        let f = &self.flags;

        let mut cmd;
        match ext {
            "c" => {
                cmd = Command::new(&self.tools.cc);
                cmd.args(&f.cppflags).args(inc_flags).args(&f.cflags);
            }
            "S" => {
                cmd = Command::new(&self.tools.cc);
                cmd.args(["-x", "assembler-with-cpp"]).args(&f.cppflags).args(inc_flags);
            }
            "ino" | "pde" => {
                cmd = Command::new(&self.tools.cxx);
                cmd.args(["-x", "c++"]).args(&f.cppflags).args(inc_flags).args(&f.cxxflags);
            }
            _ => {
                cmd = Command::new(&self.tools.cxx);
                cmd.args(&f.cppflags).args(inc_flags).args(&f.cxxflags);
            }
        }
        cmd
    }
}

impl Toolchain for Gcc {
    fn emit_deps(&self, src_dir: &Path, sources: &[PathBuf], inc_flags: &[String], output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let failed = |output: String| Abort::ScanFailed { dir: src_dir.to_owned(), output };

        let listings: Vec<Result<String>> = sources
            .par_iter()
            .map(|src| {
                let mut cmd = self.command_for(src, inc_flags);
                cmd.args(["-MM", "-MT"]).arg(obj_name(src)).arg(src);
                debug!("[deps] {:?}", cmd);

                let out = cmd.output().map_err(|e| failed(spawn_error(&cmd, &e)))?;
                if !out.status.success() {
                    return Err(failed(stderr_of(&out)));
                }
                Ok(String::from_utf8_lossy(&out.stdout).into_owned())
            })
            .collect();

        let mut text = String::new();
        for listing in listings {
            text.push_str(&listing?);
        }
        std::fs::write(output, text)?;
        Ok(())
    }

    fn compile(&self, sources: &[PathBuf], obj_dir: &Path, inc_flags: &[String]) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(obj_dir)?;

        // ── Flags fingerprint for the incremental cache ───────────────────
        let f = &self.flags;
        let flags_sig = hash_str(&format!(
            "{:?}{:?}{:?}{:?}{:?}{:?}",
            self.tools.cc, self.tools.cxx, f.cppflags, f.cflags, f.cxxflags, inc_flags
        ));
        let mut manifest = CacheManifest::load(obj_dir);

        // ── Parallel compilation ──────────────────────────────────────────
        let outcomes: Vec<(PathBuf, Outcome)> = sources
            .par_iter()
            .map(|src| {
                let obj = obj_path(obj_dir, src);
                if manifest.is_fresh(src, &obj, &flags_sig) {
                    debug!("[cache] {}", src.display());
                    return (obj, Outcome::Cached);
                }

                let mut cmd = self.command_for(src, inc_flags);
                cmd.arg("-c").arg(src).arg("-o").arg(&obj);
                cmd.arg("-MMD").arg("-MF").arg(dep_path(&obj));
                debug!("[compile] {:?}", cmd);

                let outcome = match cmd.output() {
                    Ok(out) if out.status.success() => Outcome::Built,
                    Ok(out) => Outcome::Failed(format!("In {}:\n{}", src.display(), stderr_of(&out))),
                    Err(e)  => Outcome::Failed(spawn_error(&cmd, &e)),
                };
                (obj, outcome)
            })
            .collect();

        // ── Save updated cache manifest ───────────────────────────────────
        let mut errors = Vec::new();
        let mut objects = Vec::with_capacity(outcomes.len());
        for (src, (obj, outcome)) in sources.iter().zip(outcomes) {
            match outcome {
                Outcome::Cached => {}
                Outcome::Built => match headers_of(&obj) {
                    Some(headers) => manifest.record(src, &flags_sig, &headers),
                    None => manifest.forget(src),
                },
                Outcome::Failed(e) => {
                    manifest.forget(src);
                    errors.push(e);
                }
            }
            objects.push(obj);
        }
        if let Err(e) = manifest.save(obj_dir) {
            debug!("could not write cache manifest in {}: {}", obj_dir.display(), e);
        }

        if !errors.is_empty() {
            return Err(Abort::CompileFailed { output: errors.join("\n\n") });
        }
        Ok(objects)
    }

    fn archive(&self, archive: &Path, objects: &[PathBuf]) -> Result<()> {
        if let Some(parent) = archive.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // `ar r` only adds members; start fresh so removed sources drop out.
        if archive.exists() {
            std::fs::remove_file(archive)?;
        }

        let mut cmd = Command::new(&self.tools.ar);
        cmd.arg("rcs").arg(archive).args(objects);
        debug!("[archive] {:?}", cmd);

        let out = cmd
            .output()
            .map_err(|e| Abort::ArchiveFailed { output: spawn_error(&cmd, &e) })?;
        if !out.status.success() {
            return Err(Abort::ArchiveFailed { output: stderr_of(&out) });
        }
        Ok(())
    }

    fn link(&self, objects: &[PathBuf], archives: &[PathBuf], elf: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.tools.cc);
        cmd.args(&self.flags.ldflags)
            .args(objects)
            .args(archives)
            .arg("-lm")
            .arg("-o")
            .arg(elf);
        debug!("[link] {:?}", cmd);

        let out = cmd
            .output()
            .map_err(|e| Abort::LinkFailed { output: spawn_error(&cmd, &e) })?;
        if !out.status.success() {
            return Err(Abort::LinkFailed { output: stderr_of(&out) });
        }
        Ok(())
    }

    fn objcopy(&self, elf: &Path, hex: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.tools.objcopy);
        cmd.args(["-O", "ihex", "-R", ".eeprom"]).arg(elf).arg(hex);
        debug!("[objcopy] {:?}", cmd);

        let out = cmd
            .output()
            .map_err(|e| Abort::ObjcopyFailed { output: spawn_error(&cmd, &e) })?;
        if !out.status.success() {
            return Err(Abort::ObjcopyFailed { output: stderr_of(&out) });
        }
        Ok(())
    }

    fn size_report(&self, elf: &Path) -> Option<String> {
        let size = self.tools.size.as_ref()?;

        if let Some(mcu) = &self.mcu {
            let out = Command::new(size)
                .arg("--format=avr")
                .arg(format!("--mcu={mcu}"))
                .arg(elf)
                .output();
            if let Ok(o) = out {
                if o.status.success() {
                    return Some(String::from_utf8_lossy(&o.stdout).trim().to_owned());
                }
            }
        }

        // Fallback: plain Berkeley output
        let o = Command::new(size).arg(elf).output().ok()?;
        o.status
            .success()
            .then(|| String::from_utf8_lossy(&o.stdout).trim().to_owned())
    }
}

/// Files listed in the `-MMD` output next to `obj`.  `None` when the listing
/// is missing or unreadable; such a source is rebuilt next time.
fn headers_of(obj: &Path) -> Option<Vec<PathBuf>> {
    let listing = dep_path(obj);
    let text = match std::fs::read_to_string(&listing) {
        Ok(t) => t,
        Err(e) => {
            debug!("no dependency listing {}: {}", listing.display(), e);
            return None;
        }
    };
    match parse_listing(&text) {
        Ok(paths) => Some(paths.into_iter().map(PathBuf::from).collect()),
        Err(line) => {
            debug!("unparseable dependency listing {}: {}", listing.display(), line);
            None
        }
    }
}

fn stderr_of(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&out.stdout).into_owned()
    } else {
        stderr.into_owned()
    }
}

fn spawn_error(cmd: &Command, e: &std::io::Error) -> String {
    format!("cannot run {}: {}", cmd.get_program().to_string_lossy(), e)
}
