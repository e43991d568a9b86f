//! The chunk geometry planner.
//!
//! Given the shape of one appended slice and a target chunk byte budget, the
//! planner computes the chunk shape of the slice's accumulator dataset. The
//! accumulator has one extra leading axis (the growth axis, chunked at 1 so
//! one appended slice is the minimum growth unit) and the last
//! (fastest-varying) axis is always preserved unchanged. Sizing assumes
//! 4-byte float elements.
//!
//! The geometry is computed once per key at first append and reused for all
//! later appends to that key; re-deriving it from a different byte budget
//! mid-sequence is a configuration error and is not handled automatically.

/// The element size assumed for chunk sizing, in bytes.
pub const ELEMENT_SIZE_BYTES: u64 = 4;

/// The default chunk byte budget: 1 MiB.
pub const DEFAULT_CHUNK_BUDGET_BYTES: u64 = 1024 * 1024;

/// A planned chunk geometry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkGeometry {
    /// Use the engine's default geometry (one whole slice per chunk).
    EngineDefault,
    /// An explicit chunk shape of rank `slice rank + 1`.
    Shape(Vec<u64>),
}

impl ChunkGeometry {
    /// Resolve the geometry into a concrete chunk shape for slices of
    /// `slice_shape`.
    #[must_use]
    pub fn resolve(&self, slice_shape: &[u64]) -> Vec<u64> {
        match self {
            Self::EngineDefault => whole_slice_chunk(slice_shape),
            Self::Shape(shape) => shape.clone(),
        }
    }
}

fn whole_slice_chunk(slice_shape: &[u64]) -> Vec<u64> {
    let mut shape = Vec::with_capacity(slice_shape.len() + 1);
    shape.push(1);
    shape.extend_from_slice(slice_shape);
    shape
}

/// Plan the chunk shape for an accumulator of slices shaped `slice_shape`
/// under a chunk byte budget of `budget_bytes`.
///
/// A zero budget yields the [`ChunkGeometry::EngineDefault`] sentinel. If a
/// whole slice fits within the budget, the chunk is `(1, d0, .., dk)`.
/// Otherwise the element budget is divided out by the last axis first, then
/// split across the remaining axes by the root law
/// `s_i = floor(min(d_i, cum^(1/remaining)))`, clamped to at least 1. The
/// result is deterministic for a fixed `(slice_shape, budget_bytes)` pair.
#[must_use]
pub fn plan_chunk_shape(slice_shape: &[u64], budget_bytes: u64) -> ChunkGeometry {
    if budget_bytes == 0 {
        return ChunkGeometry::EngineDefault;
    }

    let num_elements: u64 = slice_shape.iter().product();
    if slice_shape.is_empty() || num_elements.saturating_mul(ELEMENT_SIZE_BYTES) <= budget_bytes {
        return ChunkGeometry::Shape(whole_slice_chunk(slice_shape));
    }

    let ndim = slice_shape.len();
    let mut cum = budget_bytes as f64 / ELEMENT_SIZE_BYTES as f64;
    cum /= slice_shape[ndim - 1] as f64;

    let mut shape = Vec::with_capacity(ndim + 1);
    shape.push(1);
    for i in 0..ndim - 1 {
        let remaining = (ndim - i - 1) as f64;
        let s = f64::min(slice_shape[i] as f64, cum.powf(1.0 / remaining))
            .floor()
            .max(1.0);
        cum /= s;
        shape.push(s as u64);
    }
    shape.push(slice_shape[ndim - 1]);

    debug_assert_eq!(shape.len(), ndim + 1);
    ChunkGeometry::Shape(shape)
}
