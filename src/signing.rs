// src/signing.rs

//! Detached OpenPGP signatures over bundle archives
//!
//! The trust model is deliberately narrow: a signature is accepted only if it
//! validates against one of the certificates in an explicit [`TrustedKeys`]
//! set handed to [`verify`]. There is no keyring discovery, no web of trust
//! and no revocation service. Anything that goes wrong during verification
//! (unparseable signature, no trusted keys, wrong signer, modified bytes) is
//! a `SignatureInvalid` failure.
//!
//! Uses sequoia-openpgp (pure Rust).

use crate::error::{Error, Result};
use openpgp::cert::prelude::*;
use openpgp::packet::signature::SignatureBuilder;
use openpgp::parse::Parse;
use openpgp::policy::{HashAlgoSecurity, Policy, StandardPolicy};
use openpgp::serialize::{Serialize, SerializeInto};
use openpgp::types::SignatureType;
use openpgp::{Cert, Packet, PacketPile, armor};
use sequoia_openpgp as openpgp;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// Fingerprint of the certificate whose key validated the signature
    pub fingerprint: String,
    /// Fingerprint of the (sub)key that actually made the signature
    pub signing_key: String,
}

/// A private signing key (transferable secret key)
pub struct SigningKey {
    cert: Cert,
}

impl SigningKey {
    /// Generate a new certificate with a dedicated signing subkey
    pub fn generate(user_id: &str) -> Result<Self> {
        let (cert, _revocation) = CertBuilder::new()
            .add_userid(user_id)
            .add_signing_subkey()
            .generate()
            .map_err(|e| Error::KeyError(format!("Failed to generate key: {}", e)))?;
        info!("Generated signing key {}", cert.fingerprint().to_hex());
        Ok(Self { cert })
    }

    /// Parse an armored or binary secret key
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let cert = Cert::from_bytes(data)
            .map_err(|e| Error::KeyError(format!("Failed to parse secret key: {}", e)))?;
        if !cert.is_tsk() {
            return Err(Error::KeyError(format!(
                "key {} has no secret key material",
                cert.fingerprint().to_hex()
            )));
        }
        Ok(Self { cert })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            Error::KeyError(format!("Failed to read key {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&data)
    }

    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    /// ASCII-armored secret key (TSK)
    pub fn secret_armored(&self) -> Result<Vec<u8>> {
        self.cert
            .as_tsk()
            .armored()
            .to_vec()
            .map_err(|e| Error::KeyError(format!("Failed to export secret key: {}", e)))
    }

    /// ASCII-armored public certificate, suitable for a trust set
    pub fn public_armored(&self) -> Result<Vec<u8>> {
        self.cert
            .armored()
            .to_vec()
            .map_err(|e| Error::KeyError(format!("Failed to export public key: {}", e)))
    }

    fn keypair(&self) -> Result<openpgp::crypto::KeyPair> {
        let policy = StandardPolicy::new();
        let ka = self
            .cert
            .keys()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .secret()
            .next()
            .ok_or_else(|| {
                Error::KeyError(format!(
                    "key {} has no usable signing key",
                    self.fingerprint()
                ))
            })?;
        ka.key()
            .clone()
            .into_keypair()
            .map_err(|e| Error::KeyError(format!("Failed to unlock signing key: {}", e)))
    }
}

/// An explicit, injected set of trusted public certificates
pub struct TrustedKeys {
    certs: Vec<Cert>,
    policy: StandardPolicy<'static>,
}

impl Default for TrustedKeys {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustedKeys {
    /// An empty set; nothing verifies against it
    pub fn new() -> Self {
        Self {
            certs: Vec::new(),
            policy: StandardPolicy::new(),
        }
    }

    /// Add a certificate from armored or binary bytes, returning its fingerprint
    ///
    /// Any secret key material is discarded.
    pub fn add_bytes(&mut self, data: &[u8]) -> Result<String> {
        let cert = Cert::from_bytes(data)
            .map_err(|e| Error::KeyError(format!("Failed to parse public key: {}", e)))?
            .strip_secret_key_material();
        let fingerprint = cert.fingerprint().to_hex();
        if self.certs.iter().any(|c| c.fingerprint() == cert.fingerprint()) {
            debug!("Trusted key {} already present", fingerprint);
        } else {
            debug!("Trusting key {}", fingerprint);
            self.certs.push(cert);
        }
        Ok(fingerprint)
    }

    pub fn add_file(&mut self, path: &Path) -> Result<String> {
        let data = fs::read(path).map_err(|e| {
            Error::KeyError(format!("Failed to read trusted key {}: {}", path.display(), e))
        })?;
        self.add_bytes(&data)
            .map_err(|e| Error::KeyError(format!("{}: {}", path.display(), e)))
    }

    /// Load every configured key file; any unreadable key is an error
    pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut keys = Self::new();
        for path in paths {
            keys.add_file(path)?;
        }
        Ok(keys)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn fingerprints(&self) -> Vec<String> {
        self.certs.iter().map(|c| c.fingerprint().to_hex()).collect()
    }
}

/// Produce an ASCII-armored detached signature over `data`
pub fn sign(data: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
    let mut keypair = key.keypair()?;
    let sig = SignatureBuilder::new(SignatureType::Binary)
        .sign_message(&mut keypair, data)
        .map_err(|e| Error::KeyError(format!("Failed to sign: {}", e)))?;

    let mut armored = Vec::new();
    {
        let mut writer = armor::Writer::new(&mut armored, armor::Kind::Signature)
            .map_err(|e| Error::KeyError(format!("Failed to armor signature: {}", e)))?;
        Packet::from(sig)
            .serialize(&mut writer)
            .map_err(|e| Error::KeyError(format!("Failed to serialize signature: {}", e)))?;
        writer
            .finalize()
            .map_err(|e| Error::KeyError(format!("Failed to armor signature: {}", e)))?;
    }
    Ok(armored)
}

/// Sign a file, writing nothing; returns the armored signature
pub fn sign_file(path: &Path, key: &SigningKey) -> Result<Vec<u8>> {
    let data = fs::read(path)?;
    sign(&data, key)
}

/// Verify a detached signature against the trusted set
pub fn verify(data: &[u8], signature: &[u8], trusted: &TrustedKeys) -> Result<VerifiedSignature> {
    if trusted.is_empty() {
        return Err(Error::SignatureInvalid("no trusted keys configured".to_string()));
    }

    let pile = PacketPile::from_bytes(signature)
        .map_err(|e| Error::SignatureInvalid(format!("malformed signature: {}", e)))?;

    let mut seen = 0usize;
    for packet in pile.descendants() {
        let Packet::Signature(sig) = packet else {
            continue;
        };
        seen += 1;

        if let Err(e) = trusted.policy.signature(sig, HashAlgoSecurity::CollisionResistance) {
            warn!("Signature rejected by policy: {}", e);
            continue;
        }

        for cert in &trusted.certs {
            for ka in cert
                .keys()
                .with_policy(&trusted.policy, None)
                .alive()
                .revoked(false)
                .for_signing()
            {
                let mut candidate = sig.clone();
                if candidate.verify_message(ka.key(), data).is_ok() {
                    let verified = VerifiedSignature {
                        fingerprint: cert.fingerprint().to_hex(),
                        signing_key: ka.key().fingerprint().to_hex(),
                    };
                    debug!("Signature verified with key {}", verified.signing_key);
                    return Ok(verified);
                }
            }
        }
    }

    if seen == 0 {
        return Err(Error::SignatureInvalid(
            "no signature packets found".to_string(),
        ));
    }
    Err(Error::SignatureInvalid(
        "signature does not validate against any trusted key".to_string(),
    ))
}

/// Verify a detached signature file over an artifact file
pub fn verify_file(artifact: &Path, signature: &Path, trusted: &TrustedKeys) -> Result<VerifiedSignature> {
    let data = fs::read(artifact).map_err(|e| {
        Error::SignatureInvalid(format!("cannot read {}: {}", artifact.display(), e))
    })?;
    let sig = fs::read(signature).map_err(|e| {
        Error::SignatureInvalid(format!("cannot read {}: {}", signature.display(), e))
    })?;
    verify(&data, &sig, trusted)
}
