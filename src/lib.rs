// src/lib.rs

//! Airlock: bundle integrity and lifecycle distribution across an air gap
//!
//! Moves RHEL package content from a connected side to an isolated side and
//! guarantees that what arrives is byte-identical to what was produced, and
//! that it can move between lifecycle channels without corrupting what
//! managed hosts are consuming.
//!
//! # Architecture
//!
//! - BOM: canonical (path, size, sha256) manifest of a content tree
//! - Bundles: tar.gz + BOM + checksum + detached OpenPGP signature
//! - Verification: checksum, then signature against an explicit trust set,
//!   then per-file BOM comparison; all or nothing
//! - Channels: stage, verify, atomic swap, archive, metadata; journaled and
//!   locked per channel
//! - Updates: per-host RPM EVR comparison against a channel's package index

pub mod bom;
pub mod bundle;
pub mod channel;
pub mod config;
mod error;
pub mod fsutil;
pub mod hash;
pub mod manifest;
pub mod signing;
pub mod updates;
pub mod version;

pub use bom::{BillOfMaterials, BomEntry};
pub use bundle::{BundlePackager, BundleVerifier, VerifiedBundle};
pub use channel::{ChannelManager, ChannelMetadata, OperationOutcome, RecoveryOutcome};
pub use config::Config;
pub use error::{Error, Result, validate_name};
pub use manifest::{HostManifest, ManifestStore, PackageRecord};
pub use signing::{SigningKey, TrustedKeys};
pub use updates::{HostUpdateReport, UpdateEngine, UpdateRun, UpdateSummary};
pub use version::{Evr, Nevra, rpmvercmp};
