// src/hash.rs

//! SHA-256 hashing for file integrity
//!
//! Every digest that crosses the air gap is a lowercase hex SHA-256. This module
//! owns the streaming hasher, the hex validation, and the `sha256sum`-style
//! checksum file (`<hash>  <filename>`) shipped next to each bundle archive.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Length of a SHA-256 digest in hex characters
pub const SHA256_HEX_LEN: usize = 64;

const READ_BUF_SIZE: usize = 64 * 1024;

/// A validated lowercase hex SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Create a digest from a hex string, validating length and characters
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.len() != SHA256_HEX_LEN {
            return Err(Error::ParseError(format!(
                "invalid sha256 length: expected {}, got {}",
                SHA256_HEX_LEN,
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("invalid hex in sha256: {}", value)));
        }
        Ok(Self(value.to_lowercase()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sha256Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl serde::Serialize for Sha256Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

/// Compute the SHA-256 of a byte slice
pub fn sha256_bytes(data: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Sha256Hash(format!("{:x}", hasher.finalize()))
}

/// Stream a reader through SHA-256, returning the digest and byte count
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(Sha256Hash, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((Sha256Hash(format!("{:x}", hasher.finalize())), total))
}

/// Hash a file on disk without loading it into memory
pub fn sha256_file(path: &Path) -> io::Result<(Sha256Hash, u64)> {
    let file = File::open(path)?;
    sha256_reader(file)
}

/// A single `sha256sum`-style checksum line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumLine {
    pub hash: Sha256Hash,
    pub filename: String,
}

impl ChecksumLine {
    pub fn new(hash: Sha256Hash, filename: impl Into<String>) -> Self {
        Self {
            hash,
            filename: filename.into(),
        }
    }

    /// Render as `<hash>  <filename>\n` (two spaces, text mode)
    pub fn render(&self) -> String {
        format!("{}  {}\n", self.hash, self.filename)
    }

    /// Parse the first non-empty, non-comment line of a checksum file
    ///
    /// Accepts both text (`hash  name`) and binary (`hash *name`) markers.
    pub fn parse(content: &str) -> Result<Self> {
        let line = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| Error::ParseError("checksum file is empty".to_string()))?;

        let mut parts = line.split_whitespace();
        let hash = parts
            .next()
            .ok_or_else(|| Error::ParseError("checksum line has no hash".to_string()))?;
        let filename = parts
            .next()
            .ok_or_else(|| Error::ParseError("checksum line has no filename".to_string()))?;

        let filename = filename.trim_start_matches('*').trim_start_matches("./");
        Ok(Self {
            hash: Sha256Hash::new(hash)?,
            filename: filename.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        let h = sha256_bytes(b"hello world");
        assert_eq!(
            h.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = vec![7u8; READ_BUF_SIZE * 3 + 17];
        let (h, n) = sha256_reader(data.as_slice()).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(h, sha256_bytes(&data));
    }

    #[test]
    fn test_hash_validation() {
        assert!(Sha256Hash::new("abc").is_err());
        assert!(Sha256Hash::new("z".repeat(64)).is_err());
        let upper = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        assert_eq!(
            Sha256Hash::new(upper).unwrap().as_str(),
            upper.to_lowercase()
        );
    }

    #[test]
    fn test_checksum_line_render_and_parse() {
        let line = ChecksumLine::new(sha256_bytes(b"x"), "bundle.tar.gz");
        let rendered = line.render();
        assert!(rendered.contains("  bundle.tar.gz"));
        assert_eq!(ChecksumLine::parse(&rendered).unwrap(), line);
    }

    #[test]
    fn test_checksum_line_binary_marker() {
        let hash = sha256_bytes(b"x");
        let parsed = ChecksumLine::parse(&format!("# comment\n{} *./a.tar.gz\n", hash)).unwrap();
        assert_eq!(parsed.filename, "a.tar.gz");
        assert_eq!(parsed.hash, hash);
    }

    #[test]
    fn test_checksum_line_rejects_garbage() {
        assert!(ChecksumLine::parse("").is_err());
        assert!(ChecksumLine::parse("deadbeef").is_err());
        assert!(ChecksumLine::parse("deadbeef file").is_err());
    }
}
