//! Optional lossless compression of serialized values.

use rayon::prelude::*;

use crate::codec::CodecError;

/// The compression level applied when compression is enabled.
const COMPRESSION_LEVEL: i32 = 1;

/// A boolean-gated lossless compressor.
///
/// When disabled, [`compress`](Compressor::compress) and
/// [`decompress`](Compressor::decompress) are the identity. The flag is fixed
/// at backend-configuration time.
#[derive(Copy, Clone, Debug)]
pub struct Compressor {
    enabled: bool,
}

impl Compressor {
    /// Create a compressor, enabled or not.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether compression is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Compress `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] on an underlying IO error.
    pub fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.enabled {
            Ok(zstd::encode_all(bytes, COMPRESSION_LEVEL)?)
        } else {
            Ok(bytes.to_vec())
        }
    }

    /// Decompress `bytes`, the inverse of [`Compressor::compress`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptPayload`] if `bytes` is not a valid
    /// compressed stream.
    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.enabled {
            zstd::decode_all(bytes).map_err(|err| CodecError::CorruptPayload(err.to_string()))
        } else {
            Ok(bytes.to_vec())
        }
    }

    /// Decompress a batch of independent blobs.
    ///
    /// With `parallel`, blobs are decompressed on the global worker pool; no
    /// state is shared between workers and the output order always matches
    /// the input order regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns the first [`CodecError`] encountered.
    pub fn decompress_batch(
        &self,
        blobs: &[Vec<u8>],
        parallel: bool,
    ) -> Result<Vec<Vec<u8>>, CodecError> {
        if parallel {
            blobs.par_iter().map(|blob| self.decompress(blob)).collect()
        } else {
            blobs.iter().map(|blob| self.decompress(blob)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let samples: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![1; 4096],
            (0..=255).cycle().take(10_000).collect(),
        ];
        for enabled in [false, true] {
            let compressor = Compressor::new(enabled);
            for sample in &samples {
                let compressed = compressor.compress(sample).unwrap();
                assert_eq!(&compressor.decompress(&compressed).unwrap(), sample);
            }
        }
    }

    #[test]
    fn disabled_is_identity() {
        let compressor = Compressor::new(false);
        let bytes = vec![1, 2, 3];
        assert_eq!(compressor.compress(&bytes).unwrap(), bytes);
        assert_eq!(compressor.decompress(&bytes).unwrap(), bytes);
    }

    #[test]
    fn batch_preserves_order() {
        let compressor = Compressor::new(true);
        let blobs: Vec<Vec<u8>> = (0u8..32).map(|i| vec![i; 100 + usize::from(i)]).collect();
        let compressed: Vec<Vec<u8>> = blobs
            .iter()
            .map(|b| compressor.compress(b).unwrap())
            .collect();
        for parallel in [false, true] {
            let decompressed = compressor.decompress_batch(&compressed, parallel).unwrap();
            assert_eq!(decompressed, blobs);
        }
    }

    #[test]
    fn corrupt_stream() {
        let compressor = Compressor::new(true);
        assert!(matches!(
            compressor.decompress(b"not a zstd frame"),
            Err(CodecError::CorruptPayload(_))
        ));
    }
}
