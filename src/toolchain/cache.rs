// ─────────────────────────────────────────────────────────────────────────────
//  ino :: toolchain :: cache
//
//  Incremental compilation.  Each object directory keeps a manifest that
//  maps a source path to the SHA-256 of its content, of the flags it was
//  compiled with and of every header the compiler reported for it (`-MMD`).
//  A source whose entry still matches is not recompiled.
//
//  Manifest lives at <obj_dir>/.ino-cache.json
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const MANIFEST_FILE: &str = ".ino-cache.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    content: String,
    flags:   String,
    /// Header path → SHA-256 of its content at compile time.
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    entries: HashMap<String, Entry>,
}

impl CacheManifest {
    /// Load from disk.  A missing or unreadable manifest is an empty one.
    pub fn load(obj_dir: &Path) -> Self {
        std::fs::read_to_string(obj_dir.join(MANIFEST_FILE))
            .ok()
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, obj_dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(obj_dir.join(MANIFEST_FILE), json)
    }

    /// True if `obj` exists, was built with `flags_hash`, and neither `src`
    /// nor any header it included has changed since.
    pub fn is_fresh(&self, src: &Path, obj: &Path, flags_hash: &str) -> bool {
        if !obj.exists() {
            return false;
        }
        match self.entries.get(&key(src)) {
            Some(e) if e.flags == flags_hash => {
                hash_file(src).as_deref() == Some(e.content.as_str())
                    && e.headers
                        .iter()
                        .all(|(h, sum)| hash_file(Path::new(h)).as_deref() == Some(sum.as_str()))
            }
            _ => false,
        }
    }

    /// Remember `src` as built.  `headers` are the files it pulled in; `src`
    /// itself may be among them.
    pub fn record(&mut self, src: &Path, flags_hash: &str, headers: &[PathBuf]) {
        let Some(content) = hash_file(src) else {
            return;
        };
        let headers = headers
            .iter()
            .filter(|h| h.as_path() != src)
            .filter_map(|h| Some((key(h), hash_file(h)?)))
            .collect();
        self.entries.insert(key(src), Entry { content, flags: flags_hash.to_owned(), headers });
    }

    pub fn forget(&mut self, src: &Path) {
        self.entries.remove(&key(src));
    }
}

fn key(src: &Path) -> String {
    src.to_string_lossy().into_owned()
}

/// SHA-256 of a file's content, hex-encoded.
pub fn hash_file(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&data)))
}

/// SHA-256 of a string, hex-encoded.
pub fn hash_str(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

/// First 8 hex digits of `hash_str(s)`.
pub fn short_hash(s: &str) -> String {
    hash_str(s)[..8].to_owned()
}

/// Object path for `src` inside `obj_dir`.
///
/// Two sources may share a file name (`src/Servo.cpp`, `avr/Servo.cpp`),
/// so the name is prefixed with a short hash of the full source path.
pub fn obj_path(obj_dir: &Path, src: &Path) -> PathBuf {
    obj_dir.join(obj_name(src))
}

/// Where the compiler writes the `-MMD` listing for `obj`.
pub fn dep_path(obj: &Path) -> PathBuf {
    obj.with_extension("d")
}

pub fn obj_name(src: &Path) -> String {
    let fname = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into());
    format!("{}_{fname}.o", short_hash(&src.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};
    use tempfile::TempDir;

    #[test]
    fn fresh_until_source_or_flags_change() {
        let t = TempDir::new().unwrap();
        let src = t.path().join("blink.cpp");
        let obj = obj_path(t.path(), &src);
        std::fs::write(&src, "void setup() {}").unwrap();
        std::fs::write(&obj, "").unwrap();

        let mut m = CacheManifest::default();
        assert!(!m.is_fresh(&src, &obj, "f1"));
        m.record(&src, "f1", &[src.clone()]);
        m.save(t.path()).unwrap();

        let m = CacheManifest::load(t.path());
        assert!(m.is_fresh(&src, &obj, "f1"));
        assert!(!m.is_fresh(&src, &obj, "f2"));

        std::fs::write(&src, "void setup() { }").unwrap();
        assert!(!m.is_fresh(&src, &obj, "f1"));
    }

    #[test]
    fn header_edit_makes_object_stale() {
        let t = TempDir::new().unwrap();
        let src = t.path().join("Sensor.cpp");
        let hdr = t.path().join("Sensor.h");
        let obj = obj_path(t.path(), &src);
        std::fs::write(&src, "#include \"Sensor.h\"\n").unwrap();
        std::fs::write(&hdr, "#define PIN 3\n").unwrap();
        std::fs::write(&obj, "").unwrap();

        let mut m = CacheManifest::default();
        m.record(&src, "f", &[src.clone(), hdr.clone()]);
        assert!(m.is_fresh(&src, &obj, "f"));

        std::fs::write(&hdr, "#define PIN 4\n").unwrap();
        assert!(!m.is_fresh(&src, &obj, "f"));

        std::fs::remove_file(&hdr).unwrap();
        assert!(!m.is_fresh(&src, &obj, "f"));
    }

    #[test]
    fn same_file_name_different_dirs() {
        let a = obj_path(Path::new("/o"), Path::new("/libs/Servo/src/Servo.cpp"));
        let b = obj_path(Path::new("/o"), Path::new("/libs/Servo/avr/Servo.cpp"));
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("_Servo.cpp.o"));
        assert!(dep_path(&a).to_string_lossy().ends_with("_Servo.cpp.d"));
        assert_eq!(short_hash("x").len(), 8);
    }
}
