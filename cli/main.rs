// ─────────────────────────────────────────────────────────────────────────────
//  ino :: command-line build tool for Arduino sketches
//
//  Finds the Arduino distribution, turns sketches into C++, works out which
//  libraries the project needs (and in which order they must be linked) and
//  drives avr-gcc to a flashable firmware.hex.
//
//  USAGE
//  ─────
//    ino build        -m uno  -d /opt/arduino-1.0.5
//    ino preproc      src/blink.ino  -o blink.cpp
//    ino list-models
//    ino deps         -m leonardo
//    ino clean
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ino_core::build::{self, split_flags, BuildRequest};
use ino_core::locator::{Locator, LookupCache};
use ino_core::{preproc, Abort, Config, LinkOrderPolicy, Settings};

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "ino",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Build Arduino sketches from the command line",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Only print warnings and errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Print every search and compiler command
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build firmware from the sketch in ./src
    Build(BuildArgs),
    /// Print (or write) the C++ source generated from a sketch
    Preproc(PreprocArgs),
    /// List board models described by the Arduino distribution
    ListModels(DistArgs),
    /// Show the libraries the sketch needs, in link order
    Deps(DepsArgs),
    /// Remove the .build directory
    Clean,
}

impl Cmd {
    /// Name of the configuration table that applies to this command.
    fn config_table(&self) -> &'static str {
        match self {
            Cmd::Build(_)      => "build",
            Cmd::Preproc(_)    => "preproc",
            Cmd::ListModels(_) => "list-models",
            Cmd::Deps(_)       => "deps",
            Cmd::Clean         => "clean",
        }
    }
}

#[derive(Args)]
struct DistArgs {
    /// Arduino distribution root  (guessed when omitted)
    #[arg(long, short = 'd')]
    arduino_dist: Option<PathBuf>,
}

// ── Build ─────────────────────────────────────────────────────────────────────

#[derive(Args)]
struct BuildArgs {
    /// Board model  (see `ino list-models`)
    #[arg(long, short = 'm')]
    board_model: Option<String>,

    #[command(flatten)]
    dist: DistArgs,

    /// C compiler
    #[arg(long)]
    cc: Option<String>,

    /// C++ compiler
    #[arg(long)]
    cxx: Option<String>,

    /// Archiver
    #[arg(long)]
    ar: Option<String>,

    /// Object copy tool
    #[arg(long)]
    objcopy: Option<String>,

    /// Preprocessor flags shared by C and C++
    #[arg(long, allow_hyphen_values = true)]
    cppflags: Option<String>,

    /// Flags for C sources only
    #[arg(long, allow_hyphen_values = true)]
    cflags: Option<String>,

    /// Flags for C++ sources only
    #[arg(long, allow_hyphen_values = true)]
    cxxflags: Option<String>,

    /// Linker flags  (each is passed as -Wl,<flag>)
    #[arg(long, allow_hyphen_values = true)]
    ldflags: Option<String>,

    /// Library link order: move-to-tail or topological
    #[arg(long)]
    link_order: Option<LinkOrderPolicy>,
}

#[derive(Args)]
struct DepsArgs {
    /// Board model
    #[arg(long, short = 'm')]
    board_model: Option<String>,

    #[command(flatten)]
    dist: DistArgs,

    /// Library link order: move-to-tail or topological
    #[arg(long)]
    link_order: Option<LinkOrderPolicy>,
}

// ── Preproc ───────────────────────────────────────────────────────────────────

#[derive(Args)]
struct PreprocArgs {
    /// Sketch file (.ino / .pde)
    sketch: PathBuf,

    /// Write to this file instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    #[command(flatten)]
    dist: DistArgs,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        render_error(&e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let settings = config.settings(cli.command.config_table());

    let verbose = cli.verbose || (settings.verbose == Some(true) && !cli.quiet);
    init_logging(verbose, cli.quiet, cli.no_color);

    match cli.command {
        Cmd::Build(args)      => cmd_build(args, &settings, cli.quiet),
        Cmd::Preproc(args)    => cmd_preproc(args, &settings),
        Cmd::ListModels(args) => cmd_list_models(args, &settings),
        Cmd::Deps(args)       => cmd_deps(args, &settings),
        Cmd::Clean            => cmd_clean(cli.quiet),
    }
}

fn init_logging(verbose: bool, quiet: bool, no_color: bool) {
    let level = if quiet { "warn" } else if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(false)
        .without_time()
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_build(args: BuildArgs, settings: &Settings, quiet: bool) -> Result<()> {
    let mut req = project_request(settings)?;

    if let Some(v) = args.board_model       { req.board_model = v; }
    if let Some(v) = args.dist.arduino_dist { req.arduino_dist = Some(v); }
    if let Some(v) = args.cc                { req.tools.cc = v; }
    if let Some(v) = args.cxx               { req.tools.cxx = v; }
    if let Some(v) = args.ar                { req.tools.ar = v; }
    if let Some(v) = args.objcopy           { req.tools.objcopy = v; }
    if let Some(v) = args.cppflags          { req.user_flags.cppflags = split_flags(&v); }
    if let Some(v) = args.cflags            { req.user_flags.cflags = split_flags(&v); }
    if let Some(v) = args.cxxflags          { req.user_flags.cxxflags = split_flags(&v); }
    if let Some(v) = args.ldflags           { req.user_flags.ldflags = split_flags(&v); }
    if let Some(v) = args.link_order        { req.link_order = v; }

    if !quiet {
        println!(
            "{} {} {}",
            "Building".cyan().bold(),
            format!("[model: {}]", req.board_model).dimmed(),
            format!("[link order: {}]", req.link_order).dimmed(),
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    let t0 = Instant::now();
    let outcome = build::run(&req)?;

    if !quiet {
        println!("{} built in {:.2}s", "✓".green().bold(), t0.elapsed().as_secs_f64());
        println!("  {} {}", "hex:".dimmed(), outcome.firmware.display());
        println!("  {} {}", "elf:".dimmed(), outcome.elf.display());
        let libs: Vec<String> = outcome.used_libs.iter().map(|l| l.name()).collect();
        println!("  {} {}", "libs:".dimmed(), libs.join(" "));
        if let Some(size) = &outcome.size_info {
            println!("\n{}", size.dimmed());
        }
    }
    Ok(())
}

fn cmd_preproc(args: PreprocArgs, settings: &Settings) -> Result<()> {
    let dist = args.dist.arduino_dist.or_else(|| settings.arduino_dist.clone());
    let mut cache = LookupCache::new();
    let header = match Locator::new(&mut cache, dist).arduino_version() {
        Ok(v) => v.core_header(),
        Err(e) => {
            warn!("{}; assuming Arduino 1.x headers", e);
            "Arduino.h"
        }
    };

    let rendered = render_file(&args.sketch, header)?;

    match args.output {
        Some(out) => std::fs::write(&out, rendered)
            .with_context(|| format!("cannot write {}", out.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

/// Render the sketch at `path`.  `#line` names the path exactly as given on
/// the command line, so diagnostics resolve from the caller's directory.
fn render_file(path: &Path, header: &str) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read sketch {}", path.display()))?;
    let name = path.to_string_lossy().replace('\\', "\\\\");
    Ok(preproc::render_sketch(&text, &name, header))
}

fn cmd_list_models(args: DistArgs, settings: &Settings) -> Result<()> {
    let dist = args.arduino_dist.or_else(|| settings.arduino_dist.clone());
    let default = settings
        .board_model
        .clone()
        .unwrap_or_else(|| build::DEFAULT_BOARD_MODEL.to_owned());

    let mut cache = LookupCache::new();
    let mut locator = Locator::new(&mut cache, dist);
    let models = locator.board_models()?;

    for (id, name) in models.listing() {
        let marker = if id == default { " [DEFAULT]".green().to_string() } else { String::new() };
        println!("{:>12}: {}{}", id.bold(), name, marker);
    }
    Ok(())
}

fn cmd_deps(args: DepsArgs, settings: &Settings) -> Result<()> {
    let mut req = project_request(settings)?;
    if let Some(v) = args.board_model       { req.board_model = v; }
    if let Some(v) = args.dist.arduino_dist { req.arduino_dist = Some(v); }
    if let Some(v) = args.link_order        { req.link_order = v; }

    let mut cache = LookupCache::new();
    let resolution = build::dependencies(&req, &mut cache, build::gcc_for)?;

    for (i, lib) in resolution.used_libs.iter().enumerate() {
        println!("{:>3}. {} {}", i + 1, lib.name().bold(), lib.path().display().to_string().dimmed());
    }
    Ok(())
}

fn cmd_clean(quiet: bool) -> Result<()> {
    let root = std::env::current_dir()?.join(build::DEFAULT_OUTPUT_ROOT);
    let removed = build::clean(&root)?;
    if !quiet {
        if removed {
            println!("{} removed {}", "✓".green().bold(), root.display());
        } else {
            println!("{} nothing to clean", "·".dimmed());
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Request for the project in the working directory, with configuration
/// applied over the built-in defaults.
fn project_request(settings: &Settings) -> Result<BuildRequest> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let mut req = BuildRequest::new(cwd);
    settings.apply(&mut req);
    Ok(req)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_error(e: &anyhow::Error) {
    let abort = match e.downcast_ref::<Abort>() {
        Some(a) => a,
        None => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            return;
        }
    };

    match abort.root() {
        Abort::CompileFailed { output }
        | Abort::ArchiveFailed { output }
        | Abort::LinkFailed { output }
        | Abort::ObjcopyFailed { output }
        | Abort::ScanFailed { output, .. } => {
            let title = match abort {
                Abort::Stage { stage, .. } => format!("{stage} stage failed"),
                _ => "build failed".to_owned(),
            };
            eprintln!("\n{} {}", "BuildError".red().bold(), title);
            eprintln!("{}", "─".repeat(60).dimmed());
            render_tool_output(output);
            eprintln!("{}", "─".repeat(60).dimmed());
        }
        Abort::NotFound { what, searched } => {
            eprintln!("{} {} not found", "✗".red().bold(), what);
            if !searched.is_empty() {
                eprintln!("  Searched in:");
                for place in searched {
                    eprintln!("    {}", place.yellow());
                }
            }
            eprintln!("  Pass {} or set {} in ino.toml", "-d/--arduino-dist".bold(), "arduino-dist".bold());
        }
        _ => eprintln!("{} {}", "✗".red().bold(), abort),
    }
}

fn render_tool_output(output: &str) {
    for line in output.lines() {
        if line.contains("error:") {
            eprintln!("  {}", line.red());
        } else if line.contains("warning:") {
            eprintln!("  {}", line.yellow());
        } else if !line.trim().is_empty() {
            eprintln!("  {}", line.dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preproc_line_directive_keeps_the_given_path() {
        let t = tempfile::TempDir::new().unwrap();
        let sketch = t.path().join("sketches").join("blink.ino");
        std::fs::create_dir_all(sketch.parent().unwrap()).unwrap();
        std::fs::write(&sketch, "void setup() {}\nvoid loop() {}\n").unwrap();

        let rendered = render_file(&sketch, "Arduino.h").unwrap();
        let given = sketch.to_string_lossy().replace('\\', "\\\\");
        assert!(
            rendered.ends_with(&format!("#line 1 \"{given}\"\nvoid setup() {{}}\nvoid loop() {{}}\n")),
            "{rendered}"
        );
    }

    #[test]
    fn preproc_reports_unreadable_sketch() {
        let err = render_file(Path::new("does/not/exist.ino"), "Arduino.h").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.ino"));
    }
}
