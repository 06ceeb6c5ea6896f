//! Content fingerprints for drift detection
//!
//! A fingerprint is a hex digest over the canonical JSON form of a
//! desired-state fragment. It is stored as a label on the object it was
//! computed for, so the value must fit a Kubernetes label (63 chars max).

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Label carrying the fingerprint of the last-applied spec
pub const FINGERPRINT_LABEL: &str = "application.sample.ibm.com/hash";

/// Digest bytes kept in a fingerprint (160 bits, 40 hex chars)
const FINGERPRINT_BYTES: usize = 20;

/// Compute the fingerprint of a serializable value
///
/// The value is first converted to a `serde_json::Value`, whose object maps
/// are key-sorted, so struct field order and map insertion order never
/// affect the result.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(&digest[..FINGERPRINT_BYTES]))
}
