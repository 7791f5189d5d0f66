// ─────────────────────────────────────────────────────────────────────────────
//  ino :: error
//
//  Every failure the engine can raise is an `Abort`: a fatal, user-facing
//  condition that halts the current command.  Nothing is retried locally;
//  the command dispatcher renders it and exits non-zero.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::build::Stage;

#[derive(Debug, Error)]
pub enum Abort {
    #[error("{what} not found. Searched in following places:{}", bullet_list(.searched))]
    NotFound { what: String, searched: Vec<String> },

    #[error("Dependency scan of {} failed:\n{output}", .dir.display())]
    ScanFailed { dir: PathBuf, output: String },

    #[error("Malformed board description {}:{line}: expected key=value, got '{text}'", .file.display())]
    MalformedBoard { file: PathBuf, line: usize, text: String },

    #[error("Board model '{id}' not found\n  Supported models: {}", .known.join(", "))]
    UnknownBoard { id: String, known: Vec<String> },

    #[error("Board model '{board}' has no '{key}' setting")]
    MissingBoardKey { board: String, key: String },

    #[error("Could not parse Arduino library version: {0}")]
    BadVersion(String),

    #[error("No sketch sources (.ino, .pde, .c, .cpp) found in {}", .0.display())]
    NoSketch(PathBuf),

    #[error("Compilation failed:\n{output}")]
    CompileFailed { output: String },

    #[error("Archiving failed:\n{output}")]
    ArchiveFailed { output: String },

    #[error("Link failed:\n{output}")]
    LinkFailed { output: String },

    #[error("Hex conversion (objcopy) failed:\n{output}")]
    ObjcopyFailed { output: String },

    #[error("Library dependency cycle between: {}", .libs.join(", "))]
    DependencyCycle { libs: Vec<String> },

    #[error("Invalid configuration in {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Abort>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Abort>;

impl Abort {
    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &Abort {
        match self {
            Abort::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

fn bullet_list<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| format!("\n  - {i}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn not_found_lists_every_place() {
        let e = Abort::NotFound {
            what:     "avr-gcc".into(),
            searched: vec!["/opt/arduino/hardware/tools/avr/bin".into(), "/usr/bin".into()],
        };
        assert_eq!(
            e.to_string(),
            "avr-gcc not found. Searched in following places:\n  - /opt/arduino/hardware/tools/avr/bin\n  - /usr/bin"
        );
    }

    #[test]
    fn root_unwraps_stage() {
        let e = Abort::Stage {
            stage:  Stage::Link,
            source: Box::new(Abort::LinkFailed { output: "undefined reference".into() }),
        };
        assert!(matches!(e.root(), Abort::LinkFailed { .. }));
        assert!(e.to_string().starts_with("Link stage failed"));
    }
}
