// ─────────────────────────────────────────────────────────────────────────────
//  ino :: boards
//
//  Board models come from `boards.txt` files inside the Arduino
//  distribution.  Each line is `dotted.key.path=value`:
//
//      uno.name=Arduino Uno
//      uno.build.mcu=atmega328p
//      uno.build.f_cpu=16000000L
//
//  The first key segment is the board id; the rest forms a nested tree.
//  Several files may describe the same board (per-architecture layouts),
//  later keys extend the tree.  When a key is both a leaf and a prefix,
//  the leaf value is kept under the reserved `_` sub-key.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Abort, Result};

/// Sub-key holding a scalar that collided with a nested table.
pub const SCALAR_KEY: &str = "_";

/// One node of a board description tree.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardValue {
    Scalar(String),
    Table(BTreeMap<String, BoardValue>),
}

impl BoardValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            BoardValue::Scalar(s) => Some(s),
            BoardValue::Table(t)  => t.get(SCALAR_KEY).and_then(BoardValue::as_str),
        }
    }
}

/// A named hardware configuration profile.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardModel {
    pub id:       String,
    /// Directory holding the `boards.txt` that last described this board;
    /// `cores/` and `variants/` are looked up relative to it.
    pub core_dir: PathBuf,
    props:        BTreeMap<String, BoardValue>,
}

impl fmt::Display for BoardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None       => f.write_str(&self.id),
        }
    }
}

impl BoardModel {
    fn new(id: &str, core_dir: &Path) -> Self {
        Self {
            id:       id.to_owned(),
            core_dir: core_dir.to_owned(),
            props:    BTreeMap::new(),
        }
    }

    /// Look up a dotted key such as `build.mcu`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut parts = key.split('.');
        let mut node = self.props.get(parts.next()?)?;
        for part in parts {
            match node {
                BoardValue::Table(t) => node = t.get(part)?,
                BoardValue::Scalar(_) => return None,
            }
        }
        node.as_str()
    }

    /// Like `get`, but a missing key is an abort.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Abort::MissingBoardKey {
            board: self.id.clone(),
            key:   key.to_owned(),
        })
    }

    /// Display name.  Boards without one are hidden from listings.
    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn mcu(&self) -> Result<&str> {
        self.require("build.mcu")
    }

    pub fn f_cpu(&self) -> Result<&str> {
        self.require("build.f_cpu")
    }

    /// Core folder name under `cores/`.  Vendor-qualified values such as
    /// `arduino:arduino` refer to the part after the colon.
    pub fn core(&self) -> &str {
        let core = self.get("build.core").unwrap_or("arduino");
        core.rsplit(':').next().unwrap_or(core)
    }

    pub fn variant(&self) -> Result<&str> {
        self.require("build.variant")
    }

    pub fn usb_ids(&self) -> (Option<&str>, Option<&str>) {
        (self.get("build.vid"), self.get("build.pid"))
    }

    fn set(&mut self, path: &[&str], value: &str) {
        insert(&mut self.props, path, value);
    }
}

fn insert(table: &mut BTreeMap<String, BoardValue>, path: &[&str], value: &str) {
    let (head, rest) = match path.split_first() {
        Some(split) => split,
        None        => return,
    };

    if rest.is_empty() {
        match table.get_mut(*head) {
            Some(BoardValue::Table(sub)) => {
                sub.insert(SCALAR_KEY.to_owned(), BoardValue::Scalar(value.to_owned()));
            }
            _ => {
                table.insert((*head).to_owned(), BoardValue::Scalar(value.to_owned()));
            }
        }
        return;
    }

    let slot = table
        .entry((*head).to_owned())
        .or_insert_with(|| BoardValue::Table(BTreeMap::new()));

    if let BoardValue::Scalar(s) = slot {
        let mut sub = BTreeMap::new();
        sub.insert(SCALAR_KEY.to_owned(), BoardValue::Scalar(std::mem::take(s)));
        *slot = BoardValue::Table(sub);
    }

    if let BoardValue::Table(sub) = slot {
        insert(sub, rest, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Board model collection
// ─────────────────────────────────────────────────────────────────────────────

/// Every board found across all description files, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct BoardModels {
    order:  Vec<String>,
    models: HashMap<String, BoardModel>,
}

impl BoardModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and merge every file in `files`.
    pub fn load(files: &[PathBuf]) -> Result<Self> {
        let mut models = Self::new();
        for file in files {
            let text = std::fs::read_to_string(file)?;
            models.merge_str(&text, file)?;
        }
        Ok(models)
    }

    /// Merge one description file's content.  `source` is the file path;
    /// its parent directory becomes the touched boards' `core_dir`.
    pub fn merge_str(&mut self, text: &str, source: &Path) -> Result<()> {
        let core_dir = source.parent().unwrap_or_else(|| Path::new("."));

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = || Abort::MalformedBoard {
                file: source.to_owned(),
                line: idx + 1,
                text: line.to_owned(),
            };

            let (key, value) = line.split_once('=').ok_or_else(malformed)?;
            let key = key.trim();
            let path: Vec<&str> = key.split('.').collect();
            if path.iter().any(|p| p.is_empty()) {
                return Err(malformed());
            }

            let id = path[0];
            if !self.models.contains_key(id) {
                self.order.push(id.to_owned());
            }
            let model = self
                .models
                .entry(id.to_owned())
                .or_insert_with(|| BoardModel::new(id, core_dir));
            model.core_dir = core_dir.to_owned();

            if path.len() == 1 {
                model.set(&[SCALAR_KEY], value);
            } else {
                model.set(&path[1..], value);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&BoardModel> {
        self.models.get(id)
    }

    /// Fetch a board by id, or abort listing the known ones.
    pub fn model(&self, id: &str) -> Result<&BoardModel> {
        self.get(id).ok_or_else(|| Abort::UnknownBoard {
            id:    id.to_owned(),
            known: self.listing().into_iter().map(|(k, _)| k.to_owned()).collect(),
        })
    }

    /// `(id, name)` of every board that has a display name.
    pub fn listing(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id))
            .filter_map(|m| m.name().map(|n| (m.id.as_str(), n)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const AVR: &str = "\
# Arduino AVR boards
uno.name=Arduino Uno
uno.upload.protocol=arduino
uno.upload.speed=115200
uno.build.mcu=atmega328p
uno.build.f_cpu=16000000L
uno.build.core=arduino:arduino
uno.build.variant=standard

leonardo.name=Arduino Leonardo
leonardo.build.mcu=atmega32u4
leonardo.build.vid=0x2341
leonardo.build.pid=0x8036

menu.cpu=Processor
";

    fn parse(text: &str) -> BoardModels {
        let mut m = BoardModels::new();
        m.merge_str(text, Path::new("/dist/hardware/arduino/avr/boards.txt")).unwrap();
        m
    }

    #[test]
    fn parses_nested_keys() {
        let m = parse(AVR);
        let uno = m.model("uno").unwrap();
        assert_eq!(uno.name(), Some("Arduino Uno"));
        assert_eq!(uno.mcu().unwrap(), "atmega328p");
        assert_eq!(uno.f_cpu().unwrap(), "16000000L");
        assert_eq!(uno.core(), "arduino");
        assert_eq!(uno.get("upload.protocol"), Some("arduino"));
        assert_eq!(uno.core_dir, PathBuf::from("/dist/hardware/arduino/avr"));

        let leo = m.model("leonardo").unwrap();
        assert_eq!(leo.usb_ids(), (Some("0x2341"), Some("0x8036")));
    }

    #[test]
    fn unnamed_entries_are_not_listed_but_resolvable() {
        let m = parse(AVR);
        assert_eq!(
            m.listing(),
            vec![("uno", "Arduino Uno"), ("leonardo", "Arduino Leonardo")]
        );
        assert!(m.get("menu").is_some());
    }

    #[test]
    fn files_merge_by_board_id() {
        let mut m = BoardModels::new();
        m.merge_str("uno.name=Uno\n", Path::new("/a/boards.txt")).unwrap();
        m.merge_str("uno.build.mcu=atmega328p\n", Path::new("/b/boards.txt")).unwrap();

        assert_eq!(m.len(), 1);
        let uno = m.model("uno").unwrap();
        assert_eq!(uno.name(), Some("Uno"));
        assert_eq!(uno.get("build.mcu"), Some("atmega328p"));
        assert_eq!(uno.core_dir, PathBuf::from("/b"));
    }

    #[test]
    fn scalar_and_table_collision_keeps_both() {
        let m = parse("mega.build.mcu=atmega2560\nmega.build=custom\nmega.upload=avrdude\nmega.upload.speed=57600\n");
        let mega = m.model("mega").unwrap();
        assert_eq!(mega.get("build"), Some("custom"));
        assert_eq!(mega.get("build.mcu"), Some("atmega2560"));
        assert_eq!(mega.get("upload"), Some("avrdude"));
        assert_eq!(mega.get("upload.speed"), Some("57600"));
    }

    #[test]
    fn line_without_equals_is_fatal() {
        let mut m = BoardModels::new();
        let err = m
            .merge_str("uno.name=Uno\nthis line is broken\n", Path::new("/x/boards.txt"))
            .unwrap_err();
        match err {
            Abort::MalformedBoard { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "this line is broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_board_names_the_alternatives() {
        let m = parse(AVR);
        let err = m.model("due").unwrap_err();
        assert!(err.to_string().contains("uno, leonardo"));
    }

    #[test]
    fn missing_key_is_reported() {
        let m = parse(AVR);
        let err = m.model("leonardo").unwrap().variant().unwrap_err();
        assert!(matches!(err, Abort::MissingBoardKey { ref key, .. } if key == "build.variant"));
    }
}
