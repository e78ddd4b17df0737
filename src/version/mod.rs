// src/version/mod.rs

//! RPM version ordering
//!
//! This module is the single place where epoch:version-release values are
//! parsed and compared. Everything else (update computation, channel index
//! selection) goes through [`rpmvercmp`] and [`Evr`].
//!
//! # Grammar
//!
//! ```text
//! evr      = [ epoch ":" ] version [ "-" release ]
//! epoch    = 1*DIGIT | "" | "(none)"        ; absent/empty/(none) => 0
//! version  = 1*vchar                         ; must contain an alphanumeric
//! release  = 1*vchar
//! vchar    = ALPHA | DIGIT | "." | "_" | "+" | "~" | "^"
//! ```
//!
//! # Comparison
//!
//! Epochs compare as integers. Version and release strings compare with RPM's
//! `rpmvercmp` rules:
//!
//! - separators (anything that is not alphanumeric, `~` or `^`) only delimit
//! - strings split into maximal runs of digits or letters
//! - digit runs compare numerically (leading zeros ignored, longer run wins)
//! - letter runs compare bytewise
//! - a digit run is always newer than a letter run
//! - `~` sorts before everything, including the end of the string (`1.0~rc1 < 1.0`)
//! - `^` sorts after the end of the string but before any other segment
//!   (`1.0 < 1.0^git1 < 1.0.1`)
//! - otherwise, the string with segments left over is newer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Compare two version (or release) strings with RPM semantics
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = skip_separators(one);
        two = skip_separators(two);

        // Tilde: pre-release marker, older than anything
        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        // Caret: post-release marker, newer than the end of the string
        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one.first() != Some(&b'^') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = take_segment(one, numeric);
        let (seg2, rest2) = take_segment(two, numeric);
        one = rest1;
        two = rest2;

        // Segments of different types: numeric is newer
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            compare_numeric(seg1, seg2)
        } else {
            seg1.cmp(seg2)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let skip = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~' && **c != b'^')
        .count();
    &s[skip..]
}

fn take_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let len = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    s.split_at(len)
}

fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    // Longer digit run is the bigger number; equal length compares bytewise
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|c| **c == b'0').count();
    &s[zeros..]
}

/// Parse an epoch field, treating absent markers as 0
pub fn parse_epoch(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "(none)" || trimmed == "None" {
        return Ok(0);
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::VersionParseError {
            input: raw.to_string(),
            reason: "epoch must be a non-negative integer".to_string(),
        });
    }
    trimmed.parse::<u64>().map_err(|e| Error::VersionParseError {
        input: raw.to_string(),
        reason: format!("epoch out of range: {}", e),
    })
}

fn validate_component(input: &str, value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::VersionParseError {
            input: input.to_string(),
            reason: format!("empty {}", what),
        });
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~' | '^')))
    {
        return Err(Error::VersionParseError {
            input: input.to_string(),
            reason: format!("invalid character '{}' in {}", bad, what),
        });
    }
    if !value.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::VersionParseError {
            input: input.to_string(),
            reason: format!("{} has no alphanumeric segment", what),
        });
    }
    Ok(())
}

/// A parsed epoch:version-release triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: String,
}

impl Evr {
    /// Build from separate fields as found in manifests and indexes
    pub fn from_parts(epoch: &str, version: &str, release: &str) -> Result<Self> {
        let input = format!("{}:{}-{}", epoch, version, release);
        let epoch = parse_epoch(epoch).map_err(|_| Error::VersionParseError {
            input: input.clone(),
            reason: "epoch must be a non-negative integer".to_string(),
        })?;
        validate_component(&input, version, "version")?;
        validate_component(&input, release, "release")?;
        Ok(Self {
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        })
    }

    /// Parse `[epoch:]version-release`
    ///
    /// The release is everything after the last `-`.
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };
        let (version, release) = rest.rsplit_once('-').ok_or_else(|| Error::VersionParseError {
            input: s.to_string(),
            reason: "missing release (expected version-release)".to_string(),
        })?;
        let epoch = parse_epoch(epoch).map_err(|_| Error::VersionParseError {
            input: s.to_string(),
            reason: "epoch must be a non-negative integer".to_string(),
        })?;
        validate_component(s, version, "version")?;
        validate_component(s, release, "release")?;
        Ok(Self {
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        })
    }

    /// Full form, always including the epoch (`0:1.2-3`)
    pub fn to_full_string(&self) -> String {
        format!("{}:{}-{}", self.epoch, self.version, self.release)
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Display omits a zero epoch (`1.2-3`, `1:3.0.7-27.el9`)
impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.version, self.release)
    }
}

/// Name-epoch-version-release-arch identifier of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nevra {
    pub name: String,
    pub evr: Evr,
    pub arch: String,
}

impl Nevra {
    /// Parse `name-[epoch:]version-release.arch`, optionally with a `.rpm` suffix
    pub fn parse(s: &str) -> Result<Self> {
        let err = |reason: &str| Error::VersionParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let base = s.strip_suffix(".rpm").unwrap_or(s);
        let (rest, arch) = base
            .rsplit_once('.')
            .ok_or_else(|| err("missing architecture"))?;
        let (rest, release) = rest.rsplit_once('-').ok_or_else(|| err("missing release"))?;
        let (name, version) = rest.rsplit_once('-').ok_or_else(|| err("missing version"))?;
        if name.is_empty() {
            return Err(err("missing name"));
        }
        if arch.is_empty() {
            return Err(err("missing architecture"));
        }

        let (epoch, version) = match version.split_once(':') {
            Some((e, v)) => (e, v),
            None => ("0", version),
        };

        Ok(Self {
            name: name.to_string(),
            evr: Evr::from_parts(epoch, version, release)?,
            arch: arch.to_string(),
        })
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}.{}",
            self.name,
            self.evr.to_full_string(),
            self.arch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Ordering::{Equal, Greater, Less};

    fn cmp(a: &str, b: &str) -> Ordering {
        rpmvercmp(a, b)
    }

    #[test]
    fn test_rpmvercmp_basic() {
        assert_eq!(cmp("1.0", "1.0"), Equal);
        assert_eq!(cmp("1.0", "2.0"), Less);
        assert_eq!(cmp("2.0", "1.0"), Greater);
        assert_eq!(cmp("2.0.1", "2.0.1"), Equal);
        assert_eq!(cmp("2.0", "2.0.1"), Less);
        assert_eq!(cmp("2.0.1a", "2.0.1"), Greater);
        assert_eq!(cmp("5.5p1", "5.5p2"), Less);
        assert_eq!(cmp("5.5p10", "5.5p1"), Greater);
    }

    #[test]
    fn test_rpmvercmp_numeric_runs() {
        assert_eq!(cmp("10xyz", "10.1xyz"), Less);
        assert_eq!(cmp("xyz10", "xyz10.1"), Less);
        assert_eq!(cmp("1.10", "1.9"), Greater);
        assert_eq!(cmp("1.01", "1.1"), Equal);
        assert_eq!(cmp("1.001", "1.1"), Equal);
        assert_eq!(cmp("20101121", "20101122"), Less);
        assert_eq!(cmp("12345678901234567890", "9"), Greater);
    }

    #[test]
    fn test_rpmvercmp_numeric_beats_alpha() {
        assert_eq!(cmp("xyz.4", "8"), Less);
        assert_eq!(cmp("8", "xyz.4"), Greater);
        assert_eq!(cmp("1.0a", "1.0.1"), Less);
        assert_eq!(cmp("1b.fc17", "1.fc17"), Less);
        assert_eq!(cmp("1.fc17", "1g.fc17"), Less);
    }

    #[test]
    fn test_rpmvercmp_alpha_runs() {
        assert_eq!(cmp("1.0a", "1.0b"), Less);
        assert_eq!(cmp("el9", "el10"), Less);
        assert_eq!(cmp("6.el9", "9.el9"), Less);
        assert_eq!(cmp("427.13.1.el9_4", "427.13.1.el9_4"), Equal);
        assert_eq!(cmp("FC5", "fc4"), Less);
    }

    #[test]
    fn test_rpmvercmp_separators() {
        assert_eq!(cmp("1.0", "1_0"), Equal);
        assert_eq!(cmp("1..0", "1.0"), Equal);
        assert_eq!(cmp("2_0", "2.0"), Equal);
        assert_eq!(cmp("1.0+b", "1.0b"), Equal);
    }

    #[test]
    fn test_rpmvercmp_tilde() {
        assert_eq!(cmp("1.0~rc1", "1.0~rc1"), Equal);
        assert_eq!(cmp("1.0~rc1", "1.0"), Less);
        assert_eq!(cmp("1.0", "1.0~rc1"), Greater);
        assert_eq!(cmp("1.0~rc1", "1.0~rc2"), Less);
        assert_eq!(cmp("1.0~rc1~git123", "1.0~rc1"), Less);
        assert_eq!(cmp("1.0~", "1.0"), Less);
    }

    #[test]
    fn test_rpmvercmp_caret() {
        assert_eq!(cmp("1.0^", "1.0^"), Equal);
        assert_eq!(cmp("1.0^", "1.0"), Greater);
        assert_eq!(cmp("1.0", "1.0^"), Less);
        assert_eq!(cmp("1.0^git1", "1.0^git2"), Less);
        assert_eq!(cmp("1.0^git1", "1.0"), Greater);
        assert_eq!(cmp("1.0^20160101", "1.0.1"), Less);
        assert_eq!(cmp("1.0~rc1^git1", "1.0~rc1"), Greater);
        assert_eq!(cmp("1.0^git1~pre", "1.0^git1"), Less);
    }

    #[test]
    fn test_evr_epoch_dominates() {
        let high_epoch = Evr::parse("1:1.0-1").unwrap();
        let high_version = Evr::parse("0:9.9-9").unwrap();
        assert!(high_epoch > high_version);
    }

    #[test]
    fn test_evr_version_then_release() {
        assert!(Evr::parse("1.2-3").unwrap() < Evr::parse("1.3-1").unwrap());
        assert!(Evr::parse("1.2-3").unwrap() < Evr::parse("1.2-4").unwrap());
        assert_eq!(
            Evr::parse("0:1.2-3").unwrap().cmp(&Evr::parse("1.2-3").unwrap()),
            Equal
        );
    }

    #[test]
    fn test_evr_from_parts_epoch_markers() {
        let none = Evr::from_parts("(none)", "1.0", "1").unwrap();
        let empty = Evr::from_parts("", "1.0", "1").unwrap();
        assert_eq!(none.epoch, 0);
        assert_eq!(empty.epoch, 0);
        assert!(none < Evr::from_parts("0", "1.0", "2").unwrap());
    }

    #[test]
    fn test_evr_parse_errors() {
        assert!(Evr::parse("1.0").is_err());
        assert!(Evr::parse("x:1.0-1").is_err());
        assert!(Evr::parse("-1").is_err());
        assert!(Evr::parse("1.0-").is_err());
        assert!(Evr::from_parts("0", "1.0 beta", "1").is_err());
        assert!(Evr::from_parts("0", "...", "1").is_err());
        assert!(Evr::from_parts("-1", "1.0", "1").is_err());
        let err = Evr::parse("1.0").unwrap_err();
        assert!(matches!(err, Error::VersionParseError { .. }));
    }

    #[test]
    fn test_evr_display() {
        assert_eq!(Evr::parse("0:1.2-3").unwrap().to_string(), "1.2-3");
        assert_eq!(Evr::parse("1:3.0.7-27.el9").unwrap().to_string(), "1:3.0.7-27.el9");
        assert_eq!(Evr::parse("1.2-3").unwrap().to_full_string(), "0:1.2-3");
    }

    #[test]
    fn test_evr_release_with_dashes_in_version_rejected() {
        // rsplit keeps the release clean; the leftover dash lands in the version
        assert!(Evr::parse("1.0-2-3").is_err());
    }

    #[test]
    fn test_nevra_parse() {
        let n = Nevra::parse("bash-5.1.8-9.el9.x86_64.rpm").unwrap();
        assert_eq!(n.name, "bash");
        assert_eq!(n.evr.version, "5.1.8");
        assert_eq!(n.evr.release, "9.el9");
        assert_eq!(n.arch, "x86_64");
        assert_eq!(n.evr.epoch, 0);

        let n = Nevra::parse("openssl-libs-1:3.0.7-27.el9.x86_64").unwrap();
        assert_eq!(n.name, "openssl-libs");
        assert_eq!(n.evr.epoch, 1);
        assert_eq!(n.to_string(), "openssl-libs-1:3.0.7-27.el9.x86_64");
    }

    #[test]
    fn test_nevra_parse_errors() {
        assert!(Nevra::parse("bash").is_err());
        assert!(Nevra::parse("bash-5.1.8.x86_64").is_err());
        assert!(Nevra::parse("-5.1.8-9.el9.x86_64").is_err());
    }
}
