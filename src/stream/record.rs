use crate::error::{ApiError, ErrorCode, TapResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use std::sync::Arc;

/// One line of game or client output.
///
/// Lines are shared behind `Arc` once appended and are never mutated again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    source: Option<String>,
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Line {
    fn from(value: &str) -> Self {
        Line::new(value)
    }
}

impl From<String> for Line {
    fn from(value: String) -> Self {
        Line::new(value)
    }
}

/// Set of delivery channels a record belongs to, or a consumer listens on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamMask(u32);

impl StreamMask {
    pub const NONE: StreamMask = StreamMask(0);
    pub const DOWNSTREAM_RAW: StreamMask = StreamMask(1);
    pub const DOWNSTREAM_STRIPPED: StreamMask = StreamMask(2);
    pub const DOWNSTREAM_MODIFIED: StreamMask = StreamMask(4);
    pub const UPSTREAM: StreamMask = StreamMask(8);
    pub const UPSTREAM_MODIFIED: StreamMask = StreamMask(16);
    pub const SCRIPT_OUTPUT: StreamMask = StreamMask(32);
    pub const ALL: StreamMask = StreamMask(63);

    /// Mask handed to consumers that never chose one.
    pub const DEFAULT_SUBSCRIPTION: StreamMask = StreamMask::DOWNSTREAM_STRIPPED;

    const NAMES: [(&'static str, StreamMask); 6] = [
        ("raw", StreamMask::DOWNSTREAM_RAW),
        ("stripped", StreamMask::DOWNSTREAM_STRIPPED),
        ("modified", StreamMask::DOWNSTREAM_MODIFIED),
        ("upstream", StreamMask::UPSTREAM),
        ("upstream_modified", StreamMask::UPSTREAM_MODIFIED),
        ("script", StreamMask::SCRIPT_OUTPUT),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        StreamMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: StreamMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: StreamMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Non-empty and made only of known channel bits.
    pub const fn is_valid(self) -> bool {
        self.0 != 0 && self.0 & !Self::ALL.0 == 0
    }

    pub fn validate(self) -> TapResult<Self> {
        if self.is_empty() {
            return Err(ApiError::new(ErrorCode::InvalidMask, "Stream mask is empty").into());
        }
        if !self.is_valid() {
            return Err(ApiError::new(ErrorCode::InvalidMask, "Stream mask has unknown bits")
                .with_details(format!("mask={:#x}", self.0))
                .into());
        }
        Ok(self)
    }
}

impl BitOr for StreamMask {
    type Output = StreamMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        StreamMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StreamMask {
    type Output = StreamMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        StreamMask(self.0 & rhs.0)
    }
}

impl fmt::Display for StreamMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        if *self == StreamMask::ALL {
            return f.write_str("all");
        }
        let mut first = true;
        for (name, flag) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !Self::ALL.0;
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StreamMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamMask({self})")
    }
}

impl FromStr for StreamMask {
    type Err = ApiError;

    /// Parses `raw|stripped`, `all`, or a plain integer.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if let Ok(bits) = value.parse::<u32>() {
            return Ok(StreamMask(bits));
        }
        let mut mask = StreamMask::NONE;
        for part in value.split(['|', ',', '+']) {
            let part = part.trim().to_ascii_lowercase();
            if part.is_empty() {
                continue;
            }
            if part == "all" {
                mask |= StreamMask::ALL;
                continue;
            }
            let flag = Self::NAMES
                .iter()
                .find(|(name, _)| *name == part)
                .map(|(_, flag)| *flag)
                .ok_or_else(|| {
                    ApiError::new(ErrorCode::InvalidMask, "Unknown stream name")
                        .with_details(part.clone())
                })?;
            mask |= flag;
        }
        Ok(mask)
    }
}

impl Serialize for StreamMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A line tagged with the channels it is delivered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    line: Arc<Line>,
    mask: StreamMask,
}

impl StreamRecord {
    pub fn new(line: impl Into<Line>, mask: StreamMask) -> Self {
        Self {
            line: Arc::new(line.into()),
            mask,
        }
    }

    /// Copy of this record on other channels. The line itself is shared.
    pub fn reclassified(&self, mask: StreamMask) -> Self {
        Self {
            line: Arc::clone(&self.line),
            mask,
        }
    }

    pub fn line(&self) -> &Arc<Line> {
        &self.line
    }

    pub fn text(&self) -> &str {
        self.line.text()
    }

    pub fn mask(&self) -> StreamMask {
        self.mask
    }
}

impl fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_bits_do_not_overlap() {
        let mut seen = StreamMask::NONE;
        for (_, flag) in StreamMask::NAMES {
            assert!(!seen.intersects(flag));
            seen |= flag;
        }
        assert_eq!(seen, StreamMask::ALL);
    }

    #[test]
    fn validity_rejects_empty_and_unknown_bits() {
        assert!(!StreamMask::NONE.is_valid());
        assert!(!StreamMask::from_bits(64).is_valid());
        assert!(!StreamMask::from_bits(65).is_valid());
        assert!((StreamMask::UPSTREAM | StreamMask::SCRIPT_OUTPUT).is_valid());

        let err = StreamMask::NONE.validate().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidMask));
    }

    #[test]
    fn parses_names_and_numbers() {
        let mask: StreamMask = "raw|stripped".parse().expect("parse");
        assert_eq!(mask, StreamMask::DOWNSTREAM_RAW | StreamMask::DOWNSTREAM_STRIPPED);
        let mask: StreamMask = "Script, upstream".parse().expect("parse");
        assert_eq!(mask, StreamMask::SCRIPT_OUTPUT | StreamMask::UPSTREAM);
        assert_eq!("all".parse::<StreamMask>().expect("parse"), StreamMask::ALL);
        assert_eq!("8".parse::<StreamMask>().expect("parse"), StreamMask::UPSTREAM);
        assert!("bogus".parse::<StreamMask>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let mask = StreamMask::DOWNSTREAM_STRIPPED | StreamMask::SCRIPT_OUTPUT;
        assert_eq!(mask.to_string(), "stripped|script");
        assert_eq!(mask.to_string().parse::<StreamMask>().expect("parse"), mask);
        assert_eq!(StreamMask::ALL.to_string(), "all");
    }

    #[test]
    fn reclassified_shares_line_but_not_mask() {
        let record = StreamRecord::new("You see a troll.", StreamMask::DOWNSTREAM_STRIPPED);
        let copy = record.reclassified(StreamMask::SCRIPT_OUTPUT);
        assert!(Arc::ptr_eq(record.line(), copy.line()));
        assert_eq!(record.mask(), StreamMask::DOWNSTREAM_STRIPPED);
        assert_eq!(copy.mask(), StreamMask::SCRIPT_OUTPUT);
    }
}
