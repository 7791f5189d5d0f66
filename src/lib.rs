// ─────────────────────────────────────────────────────────────────────────────
//  ino_core :: public library API
// ─────────────────────────────────────────────────────────────────────────────

pub mod boards;
pub mod build;
pub mod config;
pub mod deps;
pub mod error;
pub mod fsquery;
pub mod locator;
pub mod preproc;
pub mod resolve;
pub mod toolchain;
pub mod version;

pub use boards::{BoardModel, BoardModels};
pub use build::{BuildOutcome, BuildRequest, Stage};
pub use config::{Config, Settings};
pub use deps::LibraryDir;
pub use error::{Abort, Result};
pub use locator::{Locator, LookupCache};
pub use resolve::{LinkOrderPolicy, Resolution};
pub use toolchain::{Flags, Toolchain, ToolchainPaths};
pub use version::ArduinoVersion;

/// Build the project in `project_dir` for `board_model` with default flags.
///
/// ```no_run
/// let outcome = ino_core::build_project("blink", "uno").unwrap();
/// println!("{}", outcome.firmware.display());
/// for lib in &outcome.used_libs {
///     println!("  {}", lib.name());
/// }
/// ```
pub fn build_project(project_dir: impl Into<std::path::PathBuf>, board_model: &str) -> Result<BuildOutcome> {
    let mut req = BuildRequest::new(project_dir);
    req.board_model = board_model.to_owned();
    build::run(&req)
}
