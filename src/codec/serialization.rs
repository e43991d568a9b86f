//! Serialization of [`RecordValue`]s to byte sequences.
//!
//! Two selectable algorithms, fixed at backend-configuration time:
//!
//! - [`SerializationFormat::Packed`]: a general-purpose tagged binary format
//!   over the whole value tree.
//! - [`SerializationFormat::Columnar`]: numeric arrays as raw little-endian
//!   `f32` buffers behind a fixed header, with a tagged fallback embedding
//!   the packed format for non-array values.
//!
//! Each algorithm frames its payload with a 4-byte magic; decoding bytes that
//! do not carry the selected algorithm's magic fails with
//! [`CodecError::CorruptPayload`].

use ndarray::{ArrayD, IxDyn};

use crate::{codec::CodecError, config::SerializationFormat, record::RecordValue};

const MAGIC_PACKED: [u8; 4] = *b"SRP1";
const MAGIC_COLUMNAR: [u8; 4] = *b"SRC1";

const COLUMNAR_TAG_ARRAY: u8 = 0;
const COLUMNAR_TAG_OTHER: u8 = 1;

/// A serialization strategy resolved from a [`SerializationFormat`].
///
/// The selector is resolved exactly once; the strategy is never rebound at
/// runtime.
#[derive(Copy, Clone, Debug)]
pub struct Serializer {
    format: SerializationFormat,
}

impl Serializer {
    /// Create a serializer for `format`.
    #[must_use]
    pub const fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    /// The format this serializer was resolved from.
    #[must_use]
    pub const fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Encode `value` into a framed byte sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value cannot be encoded.
    pub fn encode(&self, value: &RecordValue) -> Result<Vec<u8>, CodecError> {
        match self.format {
            SerializationFormat::Packed => {
                let mut out = MAGIC_PACKED.to_vec();
                bincode::serialize_into(&mut out, value)
                    .map_err(|err| CodecError::CorruptPayload(err.to_string()))?;
                Ok(out)
            }
            SerializationFormat::Columnar => encode_columnar(value),
        }
    }

    /// Decode a framed byte sequence produced by [`Serializer::encode`] with
    /// the same format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptPayload`] if `bytes` does not match this
    /// algorithm's framing.
    pub fn decode(&self, bytes: &[u8]) -> Result<RecordValue, CodecError> {
        let payload = strip_magic(bytes, self.format)?;
        match self.format {
            SerializationFormat::Packed => bincode::deserialize(payload)
                .map_err(|err| CodecError::CorruptPayload(err.to_string())),
            SerializationFormat::Columnar => decode_columnar(payload),
        }
    }
}

fn strip_magic(bytes: &[u8], format: SerializationFormat) -> Result<&[u8], CodecError> {
    let magic = match format {
        SerializationFormat::Packed => MAGIC_PACKED,
        SerializationFormat::Columnar => MAGIC_COLUMNAR,
    };
    match bytes.split_first_chunk::<4>() {
        Some((head, payload)) if *head == magic => Ok(payload),
        _ => Err(CodecError::CorruptPayload(format!(
            "framing does not match the {format:?} format"
        ))),
    }
}

fn encode_columnar(value: &RecordValue) -> Result<Vec<u8>, CodecError> {
    let mut out = MAGIC_COLUMNAR.to_vec();
    match value {
        RecordValue::Array(array) => {
            out.push(COLUMNAR_TAG_ARRAY);
            let shape = array.shape();
            out.extend_from_slice(
                &u32::try_from(shape.len())
                    .map_err(|err| CodecError::CorruptPayload(err.to_string()))?
                    .to_le_bytes(),
            );
            for &dim in shape {
                out.extend_from_slice(&(dim as u64).to_le_bytes());
            }
            let data: Vec<f32> = array.iter().copied().collect();
            out.extend_from_slice(&f32s_to_le_bytes(&data));
        }
        other => {
            out.push(COLUMNAR_TAG_OTHER);
            bincode::serialize_into(&mut out, other)
                .map_err(|err| CodecError::CorruptPayload(err.to_string()))?;
        }
    }
    Ok(out)
}

fn decode_columnar(payload: &[u8]) -> Result<RecordValue, CodecError> {
    let corrupt = |reason: &str| CodecError::CorruptPayload(reason.to_string());
    let (&tag, rest) = payload.split_first().ok_or_else(|| corrupt("empty payload"))?;
    match tag {
        COLUMNAR_TAG_ARRAY => {
            let (ndim_bytes, rest) = rest
                .split_first_chunk::<4>()
                .ok_or_else(|| corrupt("truncated array header"))?;
            let ndim = u32::from_le_bytes(*ndim_bytes) as usize;
            if rest.len() < ndim * 8 {
                return Err(corrupt("truncated array shape"));
            }
            let (shape_bytes, data_bytes) = rest.split_at(ndim * 8);
            let shape: Vec<usize> = shape_bytes
                .chunks_exact(8)
                .map(|dim| {
                    usize::try_from(u64::from_le_bytes(dim.try_into().unwrap()))
                        .map_err(|err| CodecError::CorruptPayload(err.to_string()))
                })
                .collect::<Result<_, _>>()?;
            let data = f32s_from_le_bytes(data_bytes)?;
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
                .map_err(|err| CodecError::CorruptPayload(err.to_string()))?;
            Ok(RecordValue::Array(array))
        }
        COLUMNAR_TAG_OTHER => {
            bincode::deserialize(rest).map_err(|err| CodecError::CorruptPayload(err.to_string()))
        }
        _ => Err(corrupt("unknown columnar tag")),
    }
}

/// Encode an `f32` slice as little-endian bytes.
pub(crate) fn f32s_to_le_bytes(values: &[f32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice(values).to_vec()
    } else {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Decode little-endian bytes into an `f32` vector.
pub(crate) fn f32s_from_le_bytes(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::CorruptPayload(
            "byte length is not a multiple of the element size".to_string(),
        ));
    }
    if cfg!(target_endian = "little") {
        Ok(bytemuck::pod_collect_to_vec(bytes))
    } else {
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
