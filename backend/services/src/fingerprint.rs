use layerscope_shared::ImageLayer;
use sha2::{Digest, Sha256};

/// Hex SHA-256 over the layer commands in order, using the blob reference for
/// layers without a command. Equal layer lists always give equal fingerprints.
pub fn fingerprint(layers: &[ImageLayer]) -> String {
    let mut hasher = Sha256::new();
    for layer in layers {
        if layer.command.is_empty() {
            hasher.update(layer.blob_sum.as_bytes());
        } else {
            hasher.update(layer.command.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
