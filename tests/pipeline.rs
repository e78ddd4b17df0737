// tests/pipeline.rs

//! End-to-end transfer: package on the connected side, verify on the
//! isolated side, publish into a channel.

mod common;

use airlock::Error;
use airlock::bom::BillOfMaterials;
use airlock::bundle::archive::write_archive;
use airlock::bundle::{BundleFiles, BundleVerifier, RejectionRecord};
use airlock::hash::{ChecksumLine, sha256_file};
use airlock::signing::{self, SigningKey};
use common::{Airgap, trust};
use std::fs;

const THREE_FILES: &[(&str, &[u8])] = &[
    ("Packages/bash-5.1.8-9.el9.x86_64.rpm", b"bash payload"),
    ("Packages/zlib-1.2.11-41.el9.x86_64.rpm", b"zlib payload"),
    ("repodata/repomd.xml", b"<repomd/>"),
];

#[test]
fn test_three_file_bundle_trust_and_corruption() {
    let env = Airgap::new();
    let manager = env.manager();
    manager.create("testing").unwrap();
    env.publish("testing", "base", &[("README", b"initial")]);

    let current = || manager.metadata("testing").unwrap().current_bundle;
    assert_eq!(current().as_deref(), Some("base"));

    // Signed with K1, verified against {K1}
    let source = env.ship("b1", THREE_FILES);
    let k1 = trust(&env.key);
    let report = BundleVerifier::new(&k1, &env.config.paths.staging)
        .check(&env.config.paths.incoming, "b1")
        .unwrap();
    assert_eq!(report.file_count, 3);
    assert_eq!(report.signature.fingerprint, env.key.fingerprint());
    assert_eq!(current().as_deref(), Some("base"));

    // Same bundle against {K2}
    let k2 = trust(&SigningKey::generate("Other <other@example.com>").unwrap());
    let err = BundleVerifier::new(&k2, &env.config.paths.staging)
        .verify(&env.config.paths.incoming, "b1")
        .unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)));
    assert_eq!(current().as_deref(), Some("base"));

    // Corrupt one file, then re-archive and re-sign with K1 while keeping the
    // shipped BOM: only the per-file comparison can catch it
    let files = BundleFiles::new(&env.config.paths.incoming, "b1").unwrap();
    let shipped_bom = BillOfMaterials::load(&files.bom()).unwrap();
    let victim = source.join("Packages/zlib-1.2.11-41.el9.x86_64.rpm");
    fs::write(&victim, b"zlib pAyload").unwrap();
    write_archive(&source, &shipped_bom, &files.archive()).unwrap();
    let (hash, _) = sha256_file(&files.archive()).unwrap();
    fs::write(
        files.checksum(),
        ChecksumLine::new(hash, files.archive_file_name()).render(),
    )
    .unwrap();
    fs::write(
        files.signature(),
        signing::sign_file(&files.archive(), &env.key).unwrap(),
    )
    .unwrap();

    let err = BundleVerifier::new(&k1, &env.config.paths.staging)
        .verify(&env.config.paths.incoming, "b1")
        .unwrap_err();
    match &err {
        Error::ChecksumMismatch { paths, .. } => {
            assert_eq!(paths, &vec!["Packages/zlib-1.2.11-41.el9.x86_64.rpm".to_string()]);
        }
        other => panic!("expected ChecksumMismatch, got {:?}", other),
    }

    // Nothing from the bundle was staged, the diagnostic names the file
    assert!(!env.config.paths.staging.join("b1").exists());
    let record: RejectionRecord =
        serde_json::from_str(&fs::read_to_string(files.rejection()).unwrap()).unwrap();
    assert_eq!(record.check, "checksum");
    assert_eq!(record.files, vec!["Packages/zlib-1.2.11-41.el9.x86_64.rpm"]);

    assert_eq!(current().as_deref(), Some("base"));
    let content = manager.content_dir("testing").unwrap();
    assert_eq!(fs::read(content.join("README")).unwrap(), b"initial");
    assert!(!content.join("Packages").exists());
}

#[test]
fn test_tampered_archive_fails_checksum_before_signature() {
    let env = Airgap::new();
    env.ship("b1", THREE_FILES);
    let files = BundleFiles::new(&env.config.paths.incoming, "b1").unwrap();

    let mut bytes = fs::read(files.archive()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(files.archive(), bytes).unwrap();

    let trusted = env.trusted();
    let err = BundleVerifier::new(&trusted, &env.config.paths.staging)
        .verify(&env.config.paths.incoming, "b1")
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    assert_eq!(err.check(), "checksum");
}

#[test]
fn test_verified_bundle_publishes_byte_identical() {
    let env = Airgap::new();
    let manager = env.manager();
    manager.create("testing").unwrap();

    let source = env.ship("b1", THREE_FILES);
    let bundle = env.receive("b1");
    let outcome = manager.publish("testing", &bundle, false).unwrap();
    assert!(outcome.changed);
    assert!(outcome.archive_id.is_none());

    let content = manager.content_dir("testing").unwrap();
    assert_eq!(common::snapshot_tree(&content), common::snapshot_tree(&source));
    let bom = manager.current_bom("testing").unwrap().unwrap();
    assert_eq!(bom, BillOfMaterials::generate(&source).unwrap());
    bom.verify_tree(&content, "testing").unwrap();
}

#[test]
fn test_missing_signature_is_structure_error() {
    let env = Airgap::new();
    env.ship("b1", THREE_FILES);
    let files = BundleFiles::new(&env.config.paths.incoming, "b1").unwrap();
    fs::remove_file(files.signature()).unwrap();

    let trusted = env.trusted();
    let err = BundleVerifier::new(&trusted, &env.config.paths.staging)
        .verify(&env.config.paths.incoming, "b1")
        .unwrap_err();
    assert!(matches!(err, Error::BundleStructureInvalid { .. }));
}
