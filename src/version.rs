// ─────────────────────────────────────────────────────────────────────────────
//  ino :: version
//
//  Arduino distributions ship `lib/version.txt`.  Its content comes in many
//  shapes (`0022`, `0022ubuntu0.1`, `0022-macosx-20110822`, `1.0`, `1.0.5`)
//  and we only need a (major, minor) pair out of it.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Abort, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArduinoVersion {
    pub major: u32,
    pub minor: u32,
}

impl ArduinoVersion {
    pub fn parse(text: &str) -> Result<Self> {
        static LEADING: OnceLock<Regex> = OnceLock::new();
        let re = LEADING.get_or_init(|| Regex::new(r"^\d+(\.\d+)?").expect("static regex"));

        let text = text.trim();
        let bad = || Abort::BadVersion(text.to_owned());
        let m = re.find(text).ok_or_else(bad)?.as_str();

        // `0022` style: pre-1.0 releases, all of them major 0
        let version = if m.starts_with('0') && !m.contains('.') {
            Self { major: 0, minor: m.parse().map_err(|_| bad())? }
        } else {
            let (major, minor) = m.split_once('.').unwrap_or((m, "0"));
            Self {
                major: major.parse().map_err(|_| bad())?,
                minor: minor.parse().map_err(|_| bad())?,
            }
        };

        // The -DARDUINO value must fit too.
        if version.major.checked_mul(100).and_then(|v| v.checked_add(version.minor)).is_none() {
            return Err(bad());
        }
        Ok(version)
    }

    /// Value for the `-DARDUINO=` define.  Saturates for hand-built values
    /// too large to come out of `parse`.
    pub fn as_int(&self) -> u32 {
        if self.major == 0 {
            self.minor
        } else {
            self.major.saturating_mul(100).saturating_add(self.minor)
        }
    }

    /// The umbrella header sketches get: `Arduino.h` since 1.0.
    pub fn core_header(&self) -> &'static str {
        if self.major > 0 { "Arduino.h" } else { "WProgram.h" }
    }
}

impl fmt::Display for ArduinoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(major: u32, minor: u32) -> ArduinoVersion {
        ArduinoVersion { major, minor }
    }

    #[test]
    fn parses_distribution_spellings() {
        assert_eq!(ArduinoVersion::parse("0022").unwrap(), v(0, 22));
        assert_eq!(ArduinoVersion::parse("0022ubuntu0.1").unwrap(), v(0, 22));
        assert_eq!(ArduinoVersion::parse("0022-macosx-20110822").unwrap(), v(0, 22));
        assert_eq!(ArduinoVersion::parse("1.0").unwrap(), v(1, 0));
        assert_eq!(ArduinoVersion::parse("1.0.5\n").unwrap(), v(1, 0));
        assert_eq!(ArduinoVersion::parse("1").unwrap(), v(1, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(ArduinoVersion::parse("arduino"), Err(Abort::BadVersion(_))));
    }

    #[test]
    fn oversized_numbers_are_rejected() {
        for text in ["50000000.0", "42949673", "4294967296", "1.99999999999"] {
            assert!(
                matches!(ArduinoVersion::parse(text), Err(Abort::BadVersion(ref t)) if t == text),
                "{text}"
            );
        }
        assert_eq!(ArduinoVersion::parse("42949672.95").unwrap().as_int(), u32::MAX);
        assert_eq!(v(u32::MAX, 1).as_int(), u32::MAX);
    }

    #[test]
    fn define_value_and_header() {
        assert_eq!(v(0, 22).as_int(), 22);
        assert_eq!(v(1, 5).as_int(), 105);
        assert_eq!(v(0, 22).core_header(), "WProgram.h");
        assert_eq!(v(1, 0).core_header(), "Arduino.h");
    }
}
