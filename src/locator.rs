// ─────────────────────────────────────────────────────────────────────────────
//  ino :: locator
//
//  Finds the Arduino distribution pieces a build needs: board descriptions,
//  the core, variants, standard libraries and the avr toolchain binaries.
//
//  Every lookup is keyed by a logical name ("cc", "arduino_core_dir", …)
//  and memoized in a `LookupCache` owned by the caller, so a resource is
//  searched for at most once per run.
//
//  Candidate places are expanded before use, in this order:
//    1. `$VAR` / `${VAR}` substitution (unset variables stay verbatim)
//    2. splitting on the platform path separator (so "$PATH" works)
//    3. leading `~` → home directory
//    4. shell glob expansion
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::boards::{BoardModel, BoardModels};
use crate::error::{Abort, Result};
use crate::fsquery;
use crate::version::ArduinoVersion;

#[cfg(target_os = "macos")]
const DIST_GUESSES: &[&str] = &[
    "/Applications/Arduino.app/Contents/Resources/Java",
    "/usr/local/share/arduino",
    "/usr/share/arduino",
];

#[cfg(not(target_os = "macos"))]
const DIST_GUESSES: &[&str] = &["/usr/local/share/arduino", "/usr/share/arduino"];

/// Where a distribution bundles its avr toolchain.
pub const TOOLS_BIN: &[&str] = &["hardware", "tools", "avr", "bin"];

/// A memoized lookup result.
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl Found {
    pub fn first(&self) -> Option<&Path> {
        match self {
            Found::One(p)   => Some(p),
            Found::Many(ps) => ps.first().map(PathBuf::as_path),
        }
    }

    pub fn into_vec(self) -> Vec<PathBuf> {
        match self {
            Found::One(p)   => vec![p],
            Found::Many(ps) => ps,
        }
    }
}

/// Per-run memo of everything the locator has resolved.
#[derive(Debug, Default)]
pub struct LookupCache {
    paths:   HashMap<String, Found>,
    boards:  Option<BoardModels>,
    version: Option<ArduinoVersion>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Found> {
        self.paths.get(key)
    }

    /// Pre-seed a key, e.g. from an explicit command-line override.
    pub fn insert(&mut self, key: &str, found: Found) {
        self.paths.insert(key.to_owned(), found);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Locator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Locator<'c> {
    cache:    &'c mut LookupCache,
    dist_dir: Option<PathBuf>,
}

impl<'c> Locator<'c> {
    /// `dist_dir` pins the Arduino distribution root; without it the usual
    /// install locations are guessed.
    pub fn new(cache: &'c mut LookupCache, dist_dir: Option<PathBuf>) -> Self {
        Self { cache, dist_dir }
    }

    /// First `places[i]/items[j]` that exists, as a joined path.
    pub fn find_file(&mut self, key: &str, items: &[&str], places: &[String], what: &str) -> Result<PathBuf> {
        let found = self.find(key, items, places, what, true, false)?;
        first_of(found, what)
    }

    /// First place that contains one of `items`, as the place itself.
    pub fn find_dir(&mut self, key: &str, items: &[&str], places: &[String], what: &str) -> Result<PathBuf> {
        let found = self.find(key, items, places, what, false, false)?;
        first_of(found, what)
    }

    /// Every `places[i]/items[j]` that exists, in search order.
    pub fn find_files(&mut self, key: &str, items: &[&str], places: &[String], what: &str) -> Result<Vec<PathBuf>> {
        Ok(self.find(key, items, places, what, true, true)?.into_vec())
    }

    fn find(
        &mut self,
        key: &str,
        items: &[&str],
        places: &[String],
        what: &str,
        join: bool,
        multi: bool,
    ) -> Result<Found> {
        if let Some(found) = self.cache.get(key) {
            return Ok(found.clone());
        }

        let searched: Vec<PathBuf> = places.iter().flat_map(|p| expand_place(p)).collect();
        let mut hits = Vec::new();

        'places: for place in searched.iter().flat_map(|p| glob_place(p)) {
            for item in items {
                let path = place.join(item);
                if !fsquery::exists(&path) {
                    continue;
                }
                if !join {
                    hits.push(place.clone());
                    if multi { continue 'places; }
                    break 'places;
                }
                hits.push(path);
                if !multi { break 'places; }
            }
        }

        let found = match (multi, hits.len()) {
            (_, 0) => {
                debug!("Searching for {} ... FAILED", what);
                return Err(Abort::NotFound {
                    what:     what.to_owned(),
                    searched: searched.iter().map(|p| p.display().to_string()).collect(),
                });
            }
            (false, _) => Found::One(hits.swap_remove(0)),
            (true, _)  => Found::Many(hits),
        };

        match &found {
            Found::One(p)   => debug!("Searching for {} ... found {}", what, p.display()),
            Found::Many(ps) => debug!("Searching for {} ... found {}", what, ps.len()),
        }

        self.cache.insert(key, found.clone());
        Ok(found)
    }

    // ── Distribution-relative lookups ─────────────────────────────────────

    /// `parts` joined onto every candidate distribution root.
    pub fn dist_places(&self, parts: &[&str]) -> Vec<String> {
        let roots: Vec<PathBuf> = match &self.dist_dir {
            Some(d) => vec![d.clone()],
            None    => DIST_GUESSES.iter().map(PathBuf::from).collect(),
        };
        roots
            .into_iter()
            .map(|root| parts.iter().fold(root, |acc, p| acc.join(p)))
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    pub fn find_arduino_dir(&mut self, key: &str, parts: &[&str], items: &[&str], what: &str) -> Result<PathBuf> {
        let places = self.dist_places(parts);
        self.find_dir(key, items, &places, what)
    }

    pub fn find_arduino_file(&mut self, key: &str, parts: &[&str], items: &[&str], what: &str) -> Result<PathBuf> {
        let places = self.dist_places(parts);
        self.find_file(key, items, &places, what)
    }

    /// Tools bundled with the distribution win; otherwise `$PATH` is searched.
    pub fn find_arduino_tool(&mut self, key: &str, parts: &[&str], items: &[&str], what: &str) -> Result<PathBuf> {
        let mut places = self.dist_places(parts);
        places.push("$PATH".into());
        self.find_file(key, items, &places, what)
    }

    /// A compiler-suite binary such as `avr-gcc`.
    pub fn find_tool(&mut self, key: &str, binary: &str) -> Result<PathBuf> {
        self.find_arduino_tool(key, TOOLS_BIN, &[binary], binary)
    }

    // ── Board descriptions and version ────────────────────────────────────

    /// All board models, loaded once per run.
    ///
    /// `boards.txt` sits in `hardware/arduino` (IDE 1.0.x) or in one file
    /// per architecture under `hardware/arduino/*` (IDE 1.5.x); every file
    /// found is merged.
    pub fn board_models(&mut self) -> Result<&BoardModels> {
        let models = match self.cache.boards.take() {
            Some(models) => models,
            None => {
                let mut places = self.dist_places(&["hardware", "arduino"]);
                places.extend(self.dist_places(&["hardware", "arduino", "*"]));
                let files = self.find_files(
                    "boards.txt",
                    &["boards.txt"],
                    &places,
                    "Board description file (boards.txt)",
                )?;
                BoardModels::load(&files)?
            }
        };
        Ok(self.cache.boards.insert(models))
    }

    pub fn board_model(&mut self, id: &str) -> Result<BoardModel> {
        Ok(self.board_models()?.model(id)?.clone())
    }

    pub fn arduino_version(&mut self) -> Result<ArduinoVersion> {
        if let Some(v) = self.cache.version {
            return Ok(v);
        }
        let file = self.find_arduino_file(
            "version.txt",
            &["lib"],
            &["version.txt"],
            "Arduino lib version file (version.txt)",
        )?;
        let v = ArduinoVersion::parse(&std::fs::read_to_string(file)?)?;
        self.cache.version = Some(v);
        Ok(v)
    }
}

fn first_of(found: Found, what: &str) -> Result<PathBuf> {
    found.first().map(Path::to_owned).ok_or_else(|| Abort::NotFound {
        what:     what.to_owned(),
        searched: Vec::new(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
//  Place expansion
// ─────────────────────────────────────────────────────────────────────────────

/// Environment substitution, separator splitting and `~` expansion.
/// Globs are left for `glob_place`.
pub fn expand_place(place: &str) -> Vec<PathBuf> {
    static VAR: OnceLock<Regex> = OnceLock::new();
    let re = VAR.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("static regex"));

    let substituted = re.replace_all(place, |c: &Captures| {
        let name = c.get(1).or_else(|| c.get(2)).map(|m| m.as_str()).unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| c[0].to_owned())
    });

    std::env::split_paths(&*substituted)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| expand_home(&p))
        .collect()
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None       => path.to_owned(),
        },
        Err(_) => path.to_owned(),
    }
}

/// Existing paths matching `place` as a glob, in sorted order.
fn glob_place(place: &Path) -> Vec<PathBuf> {
    let literal = || if place.exists() { vec![place.to_owned()] } else { Vec::new() };

    let pattern = match place.to_str() {
        Some(p) => p,
        None    => return literal(),
    };
    match glob::glob(pattern) {
        Ok(paths) => paths.flatten().collect(),
        Err(_)    => literal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, "").unwrap();
        p
    }

    fn s(p: &Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn first_hit_wins_and_is_memoized() {
        let t = TempDir::new().unwrap();
        touch(t.path(), "b/avr-gcc");
        let c = touch(t.path(), "c/avr-gcc");

        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, None);
        let places = [s(&t.path().join("a")), s(&t.path().join("c")), s(&t.path().join("b"))];
        assert_eq!(loc.find_file("cc", &["avr-gcc"], &places, "avr-gcc").unwrap(), c);

        // a second lookup under the same key never searches again
        let again = loc.find_file("cc", &["gcc"], &[], "gcc").unwrap();
        assert_eq!(again, c);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn dir_mode_returns_the_place() {
        let t = TempDir::new().unwrap();
        touch(t.path(), "cores/arduino/Arduino.h");
        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, None);
        let dir = loc
            .find_dir("core", &["Arduino.h"], &[s(&t.path().join("cores/arduino"))], "core")
            .unwrap();
        assert_eq!(dir, t.path().join("cores/arduino"));
    }

    #[test]
    fn multi_mode_collects_every_hit_through_globs() {
        let t = TempDir::new().unwrap();
        let avr = touch(t.path(), "hardware/arduino/avr/boards.txt");
        let sam = touch(t.path(), "hardware/arduino/sam/boards.txt");
        touch(t.path(), "hardware/arduino/sam/platform.txt");

        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, None);
        let found = loc
            .find_files("boards", &["boards.txt"], &[s(&t.path().join("hardware/arduino/*"))], "boards")
            .unwrap();
        assert_eq!(found, vec![avr, sam]);
    }

    #[test]
    fn env_vars_and_separators_expand() {
        let t = TempDir::new().unwrap();
        let tool = touch(t.path(), "two/avr-ar");
        let joined = std::env::join_paths([t.path().join("one"), t.path().join("two")]).unwrap();
        std::env::set_var("INO_TEST_TOOL_PATH", &joined);

        let expanded = expand_place("${INO_TEST_TOOL_PATH}");
        assert_eq!(expanded, vec![t.path().join("one"), t.path().join("two")]);

        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, None);
        let found = loc.find_file("ar", &["avr-ar"], &["$INO_TEST_TOOL_PATH".into()], "avr-ar").unwrap();
        assert_eq!(found, tool);
    }

    #[test]
    fn unset_variables_stay_verbatim() {
        assert_eq!(
            expand_place("/opt/$INO_TEST_SURELY_UNSET/bin"),
            vec![PathBuf::from("/opt/$INO_TEST_SURELY_UNSET/bin")]
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_place("~/sketchbook"), vec![home.join("sketchbook")]);
        }
    }

    #[test]
    fn exhausted_search_lists_places() {
        let t = TempDir::new().unwrap();
        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, Some(t.path().to_owned()));
        let err = loc.find_tool("objcopy", "avr-objcopy-that-does-not-exist").unwrap_err();
        match err {
            Abort::NotFound { what, searched } => {
                assert_eq!(what, "avr-objcopy-that-does-not-exist");
                assert_eq!(searched[0], s(&t.path().join("hardware/tools/avr/bin")));
                assert!(searched.len() > 1, "$PATH entries are listed too");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn board_models_merge_across_architectures() {
        let t = TempDir::new().unwrap();
        fs::create_dir_all(t.path().join("hardware/arduino/avr")).unwrap();
        fs::create_dir_all(t.path().join("hardware/arduino/sam")).unwrap();
        fs::write(t.path().join("hardware/arduino/avr/boards.txt"), "uno.name=Uno\n").unwrap();
        fs::write(t.path().join("hardware/arduino/sam/boards.txt"), "uno.build.mcu=atmega328p\n").unwrap();
        touch(t.path(), "lib/version.txt");
        fs::write(t.path().join("lib/version.txt"), "1.0.5\n").unwrap();

        let mut cache = LookupCache::new();
        let mut loc = Locator::new(&mut cache, Some(t.path().to_owned()));
        let uno = loc.board_model("uno").unwrap();
        assert_eq!(uno.name(), Some("Uno"));
        assert_eq!(uno.get("build.mcu"), Some("atmega328p"));
        assert_eq!(loc.arduino_version().unwrap(), ArduinoVersion { major: 1, minor: 0 });

        // memoized: removing the files does not matter any more
        fs::remove_dir_all(t.path().join("hardware")).unwrap();
        assert_eq!(loc.board_models().unwrap().len(), 1);
    }
}
