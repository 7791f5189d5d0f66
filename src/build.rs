// ─────────────────────────────────────────────────────────────────────────────
//  ino :: build
//
//  Build orchestrator.  One linear pass, no stage is ever revisited:
//
//    Discover → ConfigureFlags → PreprocessSketch → CompileSketch
//             → ResolveLibraries → CompileLibraries → Link
//
//  Each stage reads and extends the `BuildContext`.  A failure inside a
//  stage is wrapped in `Abort::Stage` and ends the run.
//
//  Output layout (<out> = .build/<model>[-<dist hash>]):
//    <out>/src/<sketch>.cpp          rendered sketch + sketch objects
//    <out>/<Lib>/dependencies.d      dependency listing per scanned dir
//    <out>/<Lib>/lib<Lib>.a          one archive per used library
//    <out>/firmware.elf, firmware.hex
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::boards::BoardModel;
use crate::deps::{LibraryDir, Scanner};
use crate::error::{Abort, Result};
use crate::fsquery::{self, EXCLUDED_DIRS, NATIVE_EXTS, SKETCH_EXTS};
use crate::locator::{Locator, LookupCache};
use crate::preproc;
use crate::resolve::{self, LinkOrderPolicy, Resolution};
use crate::toolchain::cache::short_hash;
use crate::toolchain::{Flags, Gcc, Toolchain, ToolchainPaths};
use crate::version::ArduinoVersion;

pub const DEFAULT_OUTPUT_ROOT: &str = ".build";
pub const DEFAULT_BOARD_MODEL: &str = "uno";
pub const DEFAULT_CPPFLAGS: &str = "-ffunction-sections -fdata-sections -g -Os -w";
pub const DEFAULT_CFLAGS: &str = "";
pub const DEFAULT_CXXFLAGS: &str = "-fno-exceptions";
pub const DEFAULT_LDFLAGS: &str = "-Os --gc-sections";

pub const FIRMWARE_ELF: &str = "firmware.elf";
pub const FIRMWARE_HEX: &str = "firmware.hex";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    ConfigureFlags,
    PreprocessSketch,
    CompileSketch,
    ResolveLibraries,
    CompileLibraries,
    Link,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Discover         => "Discover",
            Stage::ConfigureFlags   => "ConfigureFlags",
            Stage::PreprocessSketch => "PreprocessSketch",
            Stage::CompileSketch    => "CompileSketch",
            Stage::ResolveLibraries => "ResolveLibraries",
            Stage::CompileLibraries => "CompileLibraries",
            Stage::Link             => "Link",
        })
    }
}

/// Binary names (or paths) of the compiler suite, before lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolNames {
    pub cc:      String,
    pub cxx:     String,
    pub ar:      String,
    pub objcopy: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            cc:      "avr-gcc".into(),
            cxx:     "avr-g++".into(),
            ar:      "avr-ar".into(),
            objcopy: "avr-objcopy".into(),
        }
    }
}

/// Inputs to a build run.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Project root holding `src/` and, optionally, `lib/`.
    pub project_dir:  PathBuf,
    /// Where per-board build directories are created.
    pub output_root:  PathBuf,
    pub board_model:  String,
    /// Pinned Arduino distribution root; guessed when absent.
    pub arduino_dist: Option<PathBuf>,
    pub tools:        ToolNames,
    /// User flags, appended to (or for `ldflags` wrapped into) the
    /// board-derived ones.
    pub user_flags:   Flags,
    pub link_order:   LinkOrderPolicy,
}

impl BuildRequest {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            output_root:  project_dir.join(DEFAULT_OUTPUT_ROOT),
            project_dir,
            board_model:  DEFAULT_BOARD_MODEL.into(),
            arduino_dist: None,
            tools:        ToolNames::default(),
            user_flags:   Flags {
                cppflags: split_flags(DEFAULT_CPPFLAGS),
                cflags:   split_flags(DEFAULT_CFLAGS),
                cxxflags: split_flags(DEFAULT_CXXFLAGS),
                ldflags:  split_flags(DEFAULT_LDFLAGS),
            },
            link_order:   LinkOrderPolicy::default(),
        }
    }

    pub fn src_dir(&self) -> PathBuf {
        self.project_dir.join("src")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.project_dir.join("lib")
    }

    /// `<output_root>/<model>`, suffixed with a hash of the distribution
    /// path when one was given, so (board, distribution) pairs never share
    /// artifacts.
    pub fn build_dir(&self) -> PathBuf {
        let mut name = self.board_model.clone();
        if let Some(dist) = &self.arduino_dist {
            name.push('-');
            name.push_str(&short_hash(&dist.to_string_lossy()));
        }
        self.output_root.join(name)
    }
}

/// Split a flag string with shell-word rules.  Unbalanced quotes fall back
/// to plain whitespace splitting.
pub fn split_flags(text: &str) -> Vec<String> {
    shlex::split(text).unwrap_or_else(|| text.split_whitespace().map(str::to_owned).collect())
}

/// A library compiled as one piece: the include path its sources see and
/// the libraries they were found to use.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileUnit {
    pub lib:           LibraryDir,
    pub include_flags: Vec<String>,
    pub deps:          Vec<LibraryDir>,
}

/// Everything the stages share.  Filled in as the run progresses.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub board:           BoardModel,
    pub version:         ArduinoVersion,
    pub tools:           ToolchainPaths,
    pub core_dir:        PathBuf,
    pub variant_dir:     Option<PathBuf>,
    pub libraries_dir:   PathBuf,
    pub src_dir:         PathBuf,
    pub lib_dir:         PathBuf,
    pub build_dir:       PathBuf,
    pub flags:           Flags,
    pub candidates:      Vec<LibraryDir>,
    pub candidate_flags: Vec<String>,
    pub sketch_sources:  Vec<PathBuf>,
    pub sketch_objects:  Vec<PathBuf>,
    pub resolution:      Option<Resolution>,
    /// One per used library, in link order.
    pub units:           Vec<CompileUnit>,
    pub dep_files:       Vec<PathBuf>,
    pub archives:        Vec<PathBuf>,
}

/// Outputs of a build run.  Plain data, no resolver state.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub build_dir:     PathBuf,
    pub firmware:      PathBuf,
    pub elf:           PathBuf,
    /// Libraries in link order.
    pub used_libs:     Vec<LibraryDir>,
    pub include_flags: Vec<String>,
    pub dep_files:     Vec<PathBuf>,
    pub size_info:     Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Full build with the real compiler suite.
pub fn run(req: &BuildRequest) -> Result<BuildOutcome> {
    let mut cache = LookupCache::new();
    run_with(req, &mut cache, gcc_for)
}

/// Full build with a caller-chosen toolchain, created once the flags are
/// known.
pub fn run_with<F>(req: &BuildRequest, cache: &mut LookupCache, toolchain: F) -> Result<BuildOutcome>
where
    F: FnOnce(&BuildContext) -> Box<dyn Toolchain>,
{
    let mut ctx = in_stage(Stage::Discover, || discover(req, cache))?;
    in_stage(Stage::ConfigureFlags, || configure_flags(&mut ctx, req))?;
    let tc = toolchain(&ctx);

    in_stage(Stage::PreprocessSketch, || preprocess_sketch(&mut ctx))?;
    in_stage(Stage::CompileSketch, || compile_sketch(&mut ctx, tc.as_ref()))?;
    in_stage(Stage::ResolveLibraries, || resolve_libraries(&mut ctx, tc.as_ref(), req.link_order))?;
    in_stage(Stage::CompileLibraries, || compile_libraries(&mut ctx, tc.as_ref()))?;
    in_stage(Stage::Link, || link(&ctx, tc.as_ref()))
}

/// Discover, configure and resolve only: the link order without building.
pub fn dependencies<F>(req: &BuildRequest, cache: &mut LookupCache, toolchain: F) -> Result<Resolution>
where
    F: FnOnce(&BuildContext) -> Box<dyn Toolchain>,
{
    let mut ctx = in_stage(Stage::Discover, || discover(req, cache))?;
    in_stage(Stage::ConfigureFlags, || configure_flags(&mut ctx, req))?;
    let tc = toolchain(&ctx);

    in_stage(Stage::ResolveLibraries, || resolve_libraries(&mut ctx, tc.as_ref(), req.link_order))
}

/// The real toolchain for a configured context.
pub fn gcc_for(ctx: &BuildContext) -> Box<dyn Toolchain> {
    let gcc = Gcc::new(ctx.tools.clone(), ctx.flags.clone());
    match ctx.board.mcu() {
        Ok(mcu) => Box::new(gcc.with_mcu(mcu)),
        Err(_)  => Box::new(gcc),
    }
}

/// Remove every build directory under `output_root`.  Returns whether
/// anything was there.
pub fn clean(output_root: &Path) -> Result<bool> {
    if !fsquery::exists(output_root) {
        return Ok(false);
    }
    std::fs::remove_dir_all(output_root)?;
    info!("Removed {}", output_root.display());
    Ok(true)
}

fn in_stage<T>(stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("── {} ──", stage);
    f().map_err(|e| Abort::Stage { stage, source: Box::new(e) })
}

// ─────────────────────────────────────────────────────────────────────────────
//  Stages
// ─────────────────────────────────────────────────────────────────────────────

pub fn discover(req: &BuildRequest, cache: &mut LookupCache) -> Result<BuildContext> {
    let src_dir = req.src_dir();
    let sketch_exts: Vec<&str> = SKETCH_EXTS.iter().chain(NATIVE_EXTS).copied().collect();
    if fsquery::list_sources(&src_dir, &sketch_exts, true).is_empty() {
        return Err(Abort::NoSketch(src_dir));
    }

    let mut loc = Locator::new(cache, req.arduino_dist.clone());

    let board = loc.board_model(&req.board_model)?;
    let version = loc.arduino_version()?;

    // ── Core, variant, standard libraries ─────────────────────────────────
    let cores_place = place(&board.core_dir.join("cores").join(board.core()));
    let core_dir = loc.find_dir(
        "arduino_core_dir",
        &[version.core_header()],
        &[cores_place],
        "Arduino core library",
    )?;

    let variant_dir = if version.major >= 1 {
        let variant = board.variant()?;
        let variants = loc.find_dir(
            "arduino_variants_dir",
            &[variant],
            &[place(&board.core_dir.join("variants"))],
            "Arduino variants directory",
        )?;
        Some(variants.join(variant))
    } else {
        None
    };

    let libraries_dir = loc.find_arduino_dir(
        "arduino_libraries_dir",
        &[],
        &["libraries"],
        "Arduino standard libraries",
    )?;
    let libraries_dir = libraries_dir.join("libraries");

    // ── Compiler suite ────────────────────────────────────────────────────
    let tools = ToolchainPaths {
        cc:      loc.find_tool("cc", &req.tools.cc)?,
        cxx:     loc.find_tool("cxx", &req.tools.cxx)?,
        ar:      loc.find_tool("ar", &req.tools.ar)?,
        objcopy: loc.find_tool("objcopy", &req.tools.objcopy)?,
        size:    loc.find_tool("size", "avr-size").ok(),
    };

    info!("Board: {}  Arduino {}", board, version);

    Ok(BuildContext {
        board,
        version,
        tools,
        core_dir,
        variant_dir,
        libraries_dir,
        src_dir,
        lib_dir: req.lib_dir(),
        build_dir: req.build_dir(),
        flags: Flags::default(),
        candidates: Vec::new(),
        candidate_flags: Vec::new(),
        sketch_sources: Vec::new(),
        sketch_objects: Vec::new(),
        resolution: None,
        units: Vec::new(),
        dep_files: Vec::new(),
        archives: Vec::new(),
    })
}

pub fn configure_flags(ctx: &mut BuildContext, req: &BuildRequest) -> Result<()> {
    let mcu = ctx.board.mcu()?.to_owned();
    let f_cpu = ctx.board.f_cpu()?.to_owned();
    let user = &req.user_flags;

    let mut cppflags = vec![
        format!("-mmcu={mcu}"),
        format!("-DF_CPU={f_cpu}"),
        format!("-DARDUINO={}", ctx.version.as_int()),
        format!("-I{}", ctx.core_dir.display()),
    ];
    cppflags.extend(user.cppflags.iter().cloned());

    let (vid, pid) = ctx.board.usb_ids();
    if let Some(vid) = vid {
        cppflags.push(format!("-DUSB_VID={vid}"));
    }
    if let Some(pid) = pid {
        cppflags.push(format!("-DUSB_PID={pid}"));
    }
    if let Some(variant) = &ctx.variant_dir {
        cppflags.push(format!("-I{}", variant.display()));
    }

    let mut ldflags = vec![format!("-mmcu={mcu}")];
    ldflags.extend(user.ldflags.iter().map(|f| format!("-Wl,{f}")));

    ctx.flags = Flags {
        cppflags,
        cflags: user.cflags.clone(),
        cxxflags: user.cxxflags.clone(),
        ldflags,
    };

    ctx.candidates = candidate_libraries(&ctx.core_dir, &ctx.lib_dir, &ctx.libraries_dir);
    ctx.candidate_flags = resolve::include_flags(&ctx.candidates);
    debug!("cppflags: {}", ctx.flags.cppflags.join(" "));
    debug!("{} candidate libraries", ctx.candidates.len());
    Ok(())
}

/// Core first, then project libraries, then the distribution's.  A later
/// directory with an already-seen name is shadowed.
pub fn candidate_libraries(core_dir: &Path, lib_dir: &Path, libraries_dir: &Path) -> Vec<LibraryDir> {
    let dirs = std::iter::once(core_dir.to_owned())
        .chain(fsquery::list_subdirs(lib_dir, false, EXCLUDED_DIRS))
        .chain(fsquery::list_subdirs(libraries_dir, false, EXCLUDED_DIRS));

    let mut names = HashSet::new();
    let mut candidates = Vec::new();
    for dir in dirs {
        let lib = LibraryDir::new(&dir);
        if names.insert(lib.name()) {
            candidates.push(lib);
        } else {
            warn!("Library {} is shadowed by an earlier one with the same name", lib);
        }
    }
    candidates
}

pub fn preprocess_sketch(ctx: &mut BuildContext) -> Result<()> {
    let out_dir = ctx.build_dir.join("src");
    std::fs::create_dir_all(&out_dir)?;

    let mut sources = Vec::new();
    for sketch in fsquery::list_sources(&ctx.src_dir, SKETCH_EXTS, true) {
        let text = std::fs::read_to_string(&sketch)?;
        let name = sketch
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = sketch
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let rendered = preproc::render_sketch(&text, &name, ctx.version.core_header());
        let target = out_dir.join(format!("{stem}.cpp"));
        std::fs::write(&target, rendered)?;
        debug!("{} → {}", sketch.display(), target.display());
        sources.push(target);
    }

    sources.extend(fsquery::list_sources(&ctx.src_dir, NATIVE_EXTS, true));
    ctx.sketch_sources = sources;
    Ok(())
}

pub fn compile_sketch(ctx: &mut BuildContext, tc: &dyn Toolchain) -> Result<()> {
    let mut inc = vec![format!("-I{}", ctx.src_dir.display())];
    inc.extend(ctx.candidate_flags.iter().cloned());

    ctx.sketch_objects = tc.compile(&ctx.sketch_sources, &ctx.build_dir.join("src"), &inc)?;
    Ok(())
}

pub fn resolve_libraries(ctx: &mut BuildContext, tc: &dyn Toolchain, policy: LinkOrderPolicy) -> Result<Resolution> {
    let mut scanner = Scanner::new(tc, &ctx.build_dir);
    let mut resolution = resolve::resolve(&mut scanner, &ctx.src_dir, &ctx.candidates, policy)?;

    // The core is always built and always linked last.
    let core = LibraryDir::new(&ctx.core_dir);
    resolution.used_libs.retain(|l| *l != core);
    resolution.used_libs.push(core);
    resolution.include_flags = resolve::include_flags(&resolution.used_libs);

    ctx.units = resolution
        .used_libs
        .iter()
        .map(|lib| CompileUnit {
            lib:           lib.clone(),
            include_flags: resolution.include_flags.clone(),
            deps:          resolution.deps.get(lib).cloned().unwrap_or_default(),
        })
        .collect();
    ctx.dep_files = scanner.into_dep_files();
    ctx.resolution = Some(resolution.clone());
    Ok(resolution)
}

pub fn compile_libraries(ctx: &mut BuildContext, tc: &dyn Toolchain) -> Result<()> {
    let mut archives = Vec::new();
    for unit in &ctx.units {
        let name = unit.lib.name();
        let sources = fsquery::list_sources(unit.lib.path(), NATIVE_EXTS, true);
        if sources.is_empty() {
            debug!("{} has no sources, nothing to archive", name);
            continue;
        }

        let obj_dir = ctx.build_dir.join(&name);
        let objects = tc.compile(&sources, &obj_dir, &unit.include_flags)?;

        let archive = obj_dir.join(format!("lib{name}.a"));
        tc.archive(&archive, &objects)?;
        archives.push(archive);
    }
    ctx.archives = archives;
    Ok(())
}

pub fn link(ctx: &BuildContext, tc: &dyn Toolchain) -> Result<BuildOutcome> {
    let elf = ctx.build_dir.join(FIRMWARE_ELF);
    let hex = ctx.build_dir.join(FIRMWARE_HEX);

    tc.link(&ctx.sketch_objects, &ctx.archives, &elf)?;
    tc.objcopy(&elf, &hex)?;
    let size_info = tc.size_report(&elf);

    let (used_libs, include_flags) = match &ctx.resolution {
        Some(r) => (r.used_libs.clone(), r.include_flags.clone()),
        None    => (Vec::new(), Vec::new()),
    };

    Ok(BuildOutcome {
        build_dir: ctx.build_dir.clone(),
        firmware: hex,
        elf,
        used_libs,
        include_flags,
        dep_files: ctx.dep_files.clone(),
        size_info,
    })
}

fn place(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn build_dir_is_namespaced_by_dist() {
        let mut req = BuildRequest::new("/proj");
        assert_eq!(req.build_dir(), PathBuf::from("/proj/.build/uno"));

        req.board_model = "mega".into();
        req.arduino_dist = Some("/opt/arduino-1.0.5".into());
        let a = req.build_dir();
        req.arduino_dist = Some("/opt/arduino-1.8.19".into());
        let b = req.build_dir();

        assert!(a.to_string_lossy().starts_with("/proj/.build/mega-"));
        assert_eq!(a.file_name().unwrap().len(), "mega-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn default_flags_are_split() {
        let req = BuildRequest::new("/proj");
        assert_eq!(
            req.user_flags.cppflags,
            vec!["-ffunction-sections", "-fdata-sections", "-g", "-Os", "-w"]
        );
        assert_eq!(req.user_flags.cflags, Vec::<String>::new());
        assert_eq!(split_flags(r#"-DNAME="a b" -O2"#), vec!["-DNAME=a b", "-O2"]);
    }

    #[test]
    fn candidates_shadow_by_name() {
        let t = TempDir::new().unwrap();
        let core = t.path().join("cores/arduino");
        let lib = t.path().join("proj/lib");
        let dist = t.path().join("dist/libraries");
        for d in [
            core.clone(),
            lib.join("Servo"),
            lib.join("Sensor"),
            dist.join("Servo"),
            dist.join("Wire"),
            dist.join(".git"),
        ] {
            std::fs::create_dir_all(d).unwrap();
        }

        let names: Vec<(String, bool)> = candidate_libraries(&core, &lib, &dist)
            .iter()
            .map(|l| (l.name(), l.path().starts_with(std::fs::canonicalize(&lib).unwrap())))
            .collect();
        assert_eq!(
            names,
            vec![
                ("arduino".into(), false),
                ("Sensor".into(), true),
                ("Servo".into(), true),
                ("Wire".into(), false),
            ]
        );
    }

    #[test]
    fn clean_reports_whether_anything_was_removed() {
        let t = TempDir::new().unwrap();
        let out = t.path().join(".build");
        assert!(!clean(&out).unwrap());

        std::fs::create_dir_all(out.join("uno/src")).unwrap();
        assert!(clean(&out).unwrap());
        assert!(!out.exists());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::ResolveLibraries.to_string(), "ResolveLibraries");
        assert_eq!(Stage::Link.to_string(), "Link");
    }
}
