// ─────────────────────────────────────────────────────────────────────────────
//  ino :: deps
//
//  Dependency scanner.  The compiler lists every header a directory's
//  sources pull in (makefile rule syntax):
//
//      1a2b3c4d_Servo.cpp.o: /libs/Servo/Servo.cpp /libs/Servo/Servo.h \
//        /dist/hardware/arduino/cores/arduino/Arduino.h
//
//  and a header that sits below a known library directory means the scanned
//  directory depends on that library.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{Abort, Result};
use crate::fsquery::{self, NATIVE_EXTS, SKETCH_EXTS};
use crate::toolchain::Toolchain;

/// File name of the dependency listing written for every scanned directory.
pub const DEP_FILE: &str = "dependencies.d";

/// A candidate library directory.  Identity is the canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryDir(PathBuf);

impl LibraryDir {
    /// Canonicalizes `path` when it exists; otherwise keeps it as given.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_owned()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Last path component, e.g. `Servo`.
    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for LibraryDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for LibraryDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Something that can tell which of `known` a source directory uses.
pub trait Scan {
    /// Libraries among `known` referenced by the sources in `src_dir`, in
    /// the order of `known`.  `src_dir` itself is never part of the result.
    fn scan(&mut self, src_dir: &Path, known: &[LibraryDir], inc_flags: &[String]) -> Result<Vec<LibraryDir>>;
}

// ─────────────────────────────────────────────────────────────────────────────
//  Compiler-backed scanner
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the toolchain's dependency mode and attributes the listed headers.
///
/// The listing for a directory named `Foo` is kept at
/// `<build_dir>/Foo/dependencies.d`.
pub struct Scanner<'t> {
    toolchain: &'t dyn Toolchain,
    build_dir: PathBuf,
    dep_files: Vec<PathBuf>,
}

impl<'t> Scanner<'t> {
    pub fn new(toolchain: &'t dyn Toolchain, build_dir: impl Into<PathBuf>) -> Self {
        Self { toolchain, build_dir: build_dir.into(), dep_files: Vec::new() }
    }

    /// Every listing written, in scan order.
    pub fn into_dep_files(self) -> Vec<PathBuf> {
        self.dep_files
    }
}

impl Scan for Scanner<'_> {
    fn scan(&mut self, src_dir: &Path, known: &[LibraryDir], inc_flags: &[String]) -> Result<Vec<LibraryDir>> {
        let exts: Vec<&str> = SKETCH_EXTS.iter().chain(NATIVE_EXTS).copied().collect();
        let sources = fsquery::list_sources(src_dir, &exts, true);

        let unit = LibraryDir::new(src_dir);
        let output = self.build_dir.join(unit.name()).join(DEP_FILE);

        let mut flags = vec![format!("-I{}", unit.path().display())];
        flags.extend(inc_flags.iter().cloned());

        self.toolchain.emit_deps(src_dir, &sources, &flags, &output)?;
        if !self.dep_files.contains(&output) {
            self.dep_files.push(output.clone());
        }

        let text = std::fs::read_to_string(&output)?;
        let headers = parse_listing(&text).map_err(|line| Abort::ScanFailed {
            dir:    src_dir.to_owned(),
            output: format!("unparsable line in {}: {}", output.display(), line),
        })?;

        let used = attribute(&headers, known, &unit);
        debug!(
            "{} uses [{}]",
            unit.name(),
            used.iter().map(LibraryDir::name).collect::<Vec<_>>().join(", ")
        );
        Ok(used)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Listing parser
// ─────────────────────────────────────────────────────────────────────────────

/// Every prerequisite path in a makefile-rule listing, in order.
///
/// Backslash-newline continues a rule, `\ ` is a space inside a path and
/// `$$` is a literal dollar.  Blank lines and `#` comments are skipped.  A
/// line that is not a rule is returned as the error.
pub fn parse_listing(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut paths = Vec::new();

    for rule in logical_lines(text) {
        let trimmed = rule.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let prereqs = match rule_separator(&rule) {
            Some(at) => &rule[at + 1..],
            None     => return Err(trimmed.to_owned()),
        };
        paths.extend(split_words(prereqs));
    }
    Ok(paths)
}

/// Join backslash-continued physical lines.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in text.lines() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match raw.strip_suffix('\\') {
            Some(head) if !head.ends_with('\\') => {
                current.push_str(head);
                current.push(' ');
            }
            _ => {
                current.push_str(raw);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Byte offset of the `:` ending the target list.  A colon followed by a
/// non-blank (a drive letter such as `C:\`) is part of a path.
fn rule_separator(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    (0..bytes.len()).find(|&i| {
        bytes[i] == b':'
            && (i == 0 || bytes[i - 1] != b'\\')
            && bytes.get(i + 1).map_or(true, |b| b.is_ascii_whitespace())
    })
}

fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                word.push(' ');
                chars.next();
            }
            '$' if chars.peek() == Some(&'$') => {
                word.push('$');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

// ─────────────────────────────────────────────────────────────────────────────
//  Attribution
// ─────────────────────────────────────────────────────────────────────────────

/// Libraries among `known` that own at least one of `paths`, in `known`
/// order, never including `unit`.
///
/// A path belongs to a library only if the library path is followed by a
/// separator, so `/libs/Foo` never claims `/libs/FooBar/FooBar.h`.
pub fn attribute(paths: &[String], known: &[LibraryDir], unit: &LibraryDir) -> Vec<LibraryDir> {
    known
        .iter()
        .filter(|lib| *lib != unit)
        .filter(|lib| {
            let prefix = regex::escape(&lib.path().to_string_lossy());
            match Regex::new(&format!(r"^{prefix}[/\\]")) {
                Ok(re) => paths.iter().any(|p| re.is_match(p)),
                Err(_) => false,
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lib(p: &str) -> LibraryDir {
        LibraryDir(PathBuf::from(p))
    }

    #[test]
    fn parses_continued_rules() {
        let text = "\
a.o: /src/a.cpp /libs/Foo/Foo.h \\
  /libs/Bar/Bar.h
b.o: /src/b.cpp\r
";
        assert_eq!(
            parse_listing(text).unwrap(),
            vec!["/src/a.cpp", "/libs/Foo/Foo.h", "/libs/Bar/Bar.h", "/src/b.cpp"]
        );
    }

    #[test]
    fn escaped_spaces_and_dollars() {
        let text = "x.o: /My\\ Libs/Foo/Foo.h /odd$$dir/h.h\n";
        assert_eq!(
            parse_listing(text).unwrap(),
            vec!["/My Libs/Foo/Foo.h", "/odd$dir/h.h"]
        );
    }

    #[test]
    fn drive_letters_are_not_separators() {
        let text = "x.o: C:\\libs\\Foo\\Foo.h\n";
        assert_eq!(parse_listing(text).unwrap(), vec!["C:\\libs\\Foo\\Foo.h"]);
    }

    #[test]
    fn garbage_line_is_rejected() {
        assert_eq!(
            parse_listing("a.o: a.cpp\nthis is not a rule\n").unwrap_err(),
            "this is not a rule"
        );
        assert_eq!(parse_listing("\n# comment\n\n").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn prefix_library_is_not_matched() {
        let known = vec![lib("/libs/Foo"), lib("/libs/FooBar")];
        let paths = vec!["/libs/FooBar/FooBar.h".to_owned()];
        assert_eq!(attribute(&paths, &known, &lib("/sketch")), vec![lib("/libs/FooBar")]);
    }

    #[test]
    fn unit_never_depends_on_itself() {
        let known = vec![lib("/libs/Foo"), lib("/libs/Bar")];
        let paths = vec!["/libs/Foo/Foo.h".to_owned(), "/libs/Bar/utility/twi.h".to_owned()];
        assert_eq!(attribute(&paths, &known, &lib("/libs/Foo")), vec![lib("/libs/Bar")]);
    }

    #[test]
    fn result_follows_known_order() {
        let known = vec![lib("/core"), lib("/libs/B"), lib("/libs/A")];
        let paths = vec!["/libs/A/A.h".to_owned(), "/core/Arduino.h".to_owned(), "/libs/B/B.h".to_owned()];
        assert_eq!(
            attribute(&paths, &known, &lib("/sketch")),
            vec![lib("/core"), lib("/libs/B"), lib("/libs/A")]
        );
    }

    /// Toolchain whose dependency mode prints `listing` verbatim.
    struct Canned {
        listing: &'static str,
    }

    impl Toolchain for Canned {
        fn emit_deps(&self, _: &Path, _: &[PathBuf], _: &[String], output: &Path) -> Result<()> {
            std::fs::create_dir_all(output.parent().unwrap())?;
            std::fs::write(output, self.listing)?;
            Ok(())
        }
        fn compile(&self, _: &[PathBuf], _: &Path, _: &[String]) -> Result<Vec<PathBuf>> {
            unreachable!()
        }
        fn archive(&self, _: &Path, _: &[PathBuf]) -> Result<()> {
            unreachable!()
        }
        fn link(&self, _: &[PathBuf], _: &[PathBuf], _: &Path) -> Result<()> {
            unreachable!()
        }
        fn objcopy(&self, _: &Path, _: &Path) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn scanner_attributes_listed_headers() {
        let t = tempfile::TempDir::new().unwrap();
        let wire = t.path().join("Wire");
        std::fs::create_dir(&wire).unwrap();
        std::fs::write(wire.join("Wire.cpp"), "").unwrap();
        let known = vec![lib("/core"), lib("/libs/SPI")];

        let tc = Canned { listing: "x.o: Wire.cpp /core/Arduino.h\n" };
        let mut scanner = Scanner::new(&tc, t.path().join("build"));
        assert_eq!(scanner.scan(&wire, &known, &[]).unwrap(), vec![lib("/core")]);
        assert_eq!(scanner.into_dep_files(), vec![t.path().join("build/Wire").join(DEP_FILE)]);
    }

    #[test]
    fn scanner_rejects_garbage_listing() {
        let t = tempfile::TempDir::new().unwrap();
        let wire = t.path().join("Wire");
        std::fs::create_dir(&wire).unwrap();
        std::fs::write(wire.join("Wire.cpp"), "").unwrap();

        let tc = Canned { listing: "x.o: Wire.cpp\nSegmentation fault\n" };
        let mut scanner = Scanner::new(&tc, t.path().join("build"));
        let err = scanner.scan(&wire, &[lib("/core")], &[]).unwrap_err();
        match err {
            Abort::ScanFailed { dir, output } => {
                assert_eq!(dir, wire);
                assert!(output.ends_with("Segmentation fault"), "{output}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn library_dir_name_and_identity() {
        let t = tempfile::TempDir::new().unwrap();
        let dir = t.path().join("Servo");
        std::fs::create_dir(&dir).unwrap();

        let a = LibraryDir::new(&dir);
        let b = LibraryDir::new(dir.join("..").join("Servo"));
        assert_eq!(a, b);
        assert_eq!(a.name(), "Servo");
    }
}
