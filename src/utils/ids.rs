// Identifier helpers

use sha3::Shake256;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use uuid::Uuid;

/// Fresh entity identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Short stable digest of a block title.
///
/// Titles are not unique across runs or files, so titled blocks are keyed by
/// a 4 byte SHAKE-256 digest rendered as 8 hex characters.
pub fn title_hash(title: &str) -> String {
    let mut hasher = Shake256::default();
    hasher.update(title.as_bytes());
    let mut reader = hasher.finalize_xof();
    let mut digest = [0u8; 4];
    reader.read(&mut digest);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
