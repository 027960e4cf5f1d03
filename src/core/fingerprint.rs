use crate::types::{BoundingBoxGeometry, ExportResult};
use sha2::{Digest, Sha256};

/// Length of the hex fingerprint used for cache entry names.
const FINGERPRINT_LEN: usize = 16;

/// Deterministic fingerprint of a drawn polygon.
///
/// The fingerprint names cache entries on disk and correlates UI state with
/// completed exports, so identical coordinate sequences must always map to
/// the same string.
pub fn fingerprint(geometry: &BoundingBoxGeometry) -> ExportResult<String> {
    geometry.validate()?;

    let mut hasher = Sha256::new();
    for ring in geometry.rings() {
        for &[lon, lat] in ring {
            hasher.update(lon.to_be_bytes());
            hasher.update(lat.to_be_bytes());
        }
        // Ring separator, so [[a,b]] and [[a],[b]] hash differently.
        hasher.update([0xff]);
    }

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex[..FINGERPRINT_LEN].to_string())
}
