use sha2::{Digest, Sha256};

use crate::types::Batch;

/// Fingerprint of a batch plan: batch boundaries plus each file's path and
/// size. Two packings of the same file list with the same options produce
/// the same digest; a stored progress cursor is only meaningful for the plan
/// it was recorded against.
pub fn plan_digest(batches: &[Batch]) -> String {
    let mut hasher = Sha256::new();
    for batch in batches {
        hasher.update((batch.index as u64).to_le_bytes());
        hasher.update([u8::from(batch.over_limit)]);
        hasher.update((batch.files.len() as u64).to_le_bytes());
        for file in &batch.files {
            hasher.update(file.path.as_bytes());
            hasher.update([0]);
            hasher.update(file.size.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
