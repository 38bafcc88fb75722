//! Deterministic name derivation
//!
//! Determinism is the contract: the same inputs always produce the same
//! names, which is what makes re-registration idempotent and lets the
//! sweeper recognize its own servers. No collision detection.

use sha2::{Digest, Sha256};

/// Backend name for a service: dashes become underscores
#[must_use]
pub fn sanitize_backend(service_name: &str) -> String {
    service_name.replace('-', "_")
}

/// Server name for an instance: `<backend>_<dotted address>_<port>` with
/// dots replaced by underscores
#[must_use]
pub fn server_name(service_name: &str, address: &str, port: u16) -> String {
    format!(
        "{}_{}_{}",
        sanitize_backend(service_name),
        address.replace('.', "_"),
        port
    )
}

/// ACL name for a `(backend, domain)` pair: character-class-safe and unique
/// per pair via a truncated content hash of the domain
#[must_use]
pub fn acl_name(backend: &str, domain: &str) -> String {
    let digest = Sha256::digest(domain.as_bytes());
    let hash = hex::encode(digest);
    format!("is_{}_{}", sanitize_backend(backend), &hash[..8])
}
