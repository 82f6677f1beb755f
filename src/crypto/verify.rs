//! Peer identity verification.
//!
//! Two strategies, fixed when the [`Encryptor`](crate::crypto::Encryptor) is
//! built: [`PeerVerifier::Native`] delegates everything to the transport's
//! certificate verification, [`PeerVerifier::Manual`] re-checks identity here
//! after the transport reports handshake completion — a fingerprint match
//! over the DER certificate and/or a wildcard-aware name match against the
//! certificate's Common Name and `DNS:` Subject Alternative Names.

use crate::base::neterror::NetError;
use crate::socket::options::{CryptoOptions, OptionValue};
use crate::socket::stream::SharedSocket;
use boring::hash::{hash, MessageDigest};
use boring::nid::Nid;
use boring::x509::X509;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerifier {
    /// The transport verifies the chain and hostname itself.
    Native,
    /// Verify fingerprint and name here, from the captured certificate.
    Manual,
}

impl PeerVerifier {
    /// Check the peer's identity against `peer_fingerprint` / `peer_name`.
    /// Failures are logged as warnings and surface as
    /// [`NetError::CryptoError`].
    pub fn verify(&self, socket: &SharedSocket, options: &CryptoOptions) -> Result<(), NetError> {
        match self {
            PeerVerifier::Native => Ok(()),
            PeerVerifier::Manual => verify_manual(socket, options),
        }
    }
}

fn verify_manual(socket: &SharedSocket, options: &CryptoOptions) -> Result<(), NetError> {
    let wants_fingerprint = options.contains("peer_fingerprint");
    let wants_name = options.get_str("peer_name").is_some();
    if !wants_fingerprint && !wants_name {
        return Ok(());
    }
    let Some(der) = socket.peer_certificate() else {
        tracing::warn!(id = socket.id(), "peer verification requested but no certificate captured");
        return Err(NetError::CryptoError(
            "no peer certificate available for verification".to_string(),
        ));
    };
    if let Some(expected) = options.get("peer_fingerprint") {
        let candidates = fingerprint_candidates(expected);
        if !verify_fingerprint(&der, &candidates) {
            tracing::warn!(id = socket.id(), "peer certificate fingerprint mismatch");
            return Err(NetError::CryptoError("peer certificate fingerprint mismatch".to_string()));
        }
    }
    if let Some(peer_name) = options.get_str("peer_name") {
        let cert =
            X509::from_der(&der).map_err(|error| NetError::CryptoError(error.to_string()))?;
        if !verify_peer_name(&cert, peer_name) {
            tracing::warn!(
                id = socket.id(),
                peer_name = %peer_name,
                "peer certificate does not match expected name"
            );
            return Err(NetError::CryptoError(format!(
                "peer certificate does not match name {peer_name}"
            )));
        }
    }
    Ok(())
}

fn fingerprint_candidates(value: &OptionValue) -> Vec<String> {
    match value {
        OptionValue::Str(digest) => vec![digest.clone()],
        OptionValue::List(digests) => digests.clone(),
        _ => Vec::new(),
    }
}

/// A 40-hex candidate is compared against the SHA-1 of the DER certificate,
/// anything else against its MD5. Hex comparison is case-sensitive.
pub fn verify_fingerprint(cert_der: &[u8], candidates: &[String]) -> bool {
    candidates.iter().any(|candidate| {
        let digest =
            if candidate.len() == 40 { MessageDigest::sha1() } else { MessageDigest::md5() };
        match hash(digest, cert_der) {
            Ok(computed) => hex::encode(&computed[..]) == *candidate,
            Err(_) => false,
        }
    })
}

/// `peer_name` matches when the certificate's Common Name or any `DNS:`
/// Subject Alternative Name matches under the wildcard rule.
pub fn verify_peer_name(cert: &X509, peer_name: &str) -> bool {
    if let Some(entry) = cert.subject_name().entries_by_nid(Nid::COMMONNAME).next() {
        let common_name = String::from_utf8_lossy(entry.data().as_slice());
        if wildcard_match(&common_name, peer_name) {
            return true;
        }
    }
    if let Some(names) = cert.subject_alt_names() {
        for name in names.iter() {
            if let Some(dns) = name.dnsname() {
                if wildcard_match(dns, peer_name) {
                    return true;
                }
            }
        }
    }
    false
}

/// Case-insensitive name match. A certificate name beginning with `*.`
/// consumes exactly one non-empty leading label of the peer name; any other
/// name must match exactly.
pub fn wildcard_match(cert_name: &str, peer_name: &str) -> bool {
    let cert_name = cert_name.to_ascii_lowercase();
    let peer_name = peer_name.to_ascii_lowercase();
    match cert_name.strip_prefix("*.") {
        Some(suffix) => match peer_name.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => cert_name == peer_name,
    }
}
