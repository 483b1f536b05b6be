use sha2::{Digest, Sha256};

const IDENTITY_LEN: usize = 12;

/// First `len` hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str, len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..len.min(digest.len())].to_string()
}

/// Identity of a file inside its collection. Derived from the
/// collection-relative path, never from the file's bytes: moving a file
/// changes its identity, rewriting it does not.
pub fn compute_identity(nix_path: &str) -> String {
    debug_assert!(nix_path.starts_with('/'), "path must be rooted: {nix_path}");
    debug_assert!(
        nix_path == "/" || !nix_path.ends_with('/'),
        "path must not end with a slash: {nix_path}"
    );
    short_hash(nix_path, IDENTITY_LEN)
}

/// A fresh hash seeded from `seed`, the clock and a random UUID.
pub fn random_hash(seed: &str, len: usize) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    short_hash(&format!("{seed}{nanos}{}", uuid::Uuid::new_v4()), len)
}
