//! Chunked accumulator datasets.
//!
//! A dataset is one growing `f32` array under a key: JSON metadata at
//! `key/meta.json` and one file per chunk at `key/c/<i0>/<i1>/...`. The
//! leading axis is the growth axis and is chunked at 1, so appending a slice
//! writes only that slice's chunks and never rewrites prior data. Metadata is
//! rewritten after the new slice's chunks are durable, so a reader never
//! observes a row it cannot read.

use std::sync::Arc;

use itertools::Itertools;
use ndarray::{ArrayD, IxDyn, SliceInfo, SliceInfoElem};
use serde::{Deserialize, Serialize};

use crate::{
    chunk_plan::ChunkGeometry,
    codec::serialization::{f32s_from_le_bytes, f32s_to_le_bytes},
    key::RecordKey,
    store::{chunked::filesystem::FilesystemStore, StoreError},
};

pub(crate) const METADATA_FILE: &str = "meta.json";
pub(crate) const CHUNK_DIR: &str = "c";

const DTYPE_F32: &str = "float32";
const COMPRESSOR_ZSTD: &str = "zstd";
const CHUNK_COMPRESSION_LEVEL: i32 = 1;

/// Persisted dataset metadata.
///
/// `shape[0]` is the number of accumulated rows; `chunk_shape` has the same
/// rank with a leading 1 and the last axis equal to the slice's last axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct DatasetMetadata {
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    dtype: String,
    compressor: Option<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct Dataset {
    fs: Arc<FilesystemStore>,
    key: RecordKey,
    meta: DatasetMetadata,
}

impl Dataset {
    /// Open the dataset under `key`, if its metadata exists.
    pub(crate) fn open(
        fs: &Arc<FilesystemStore>,
        key: &RecordKey,
    ) -> Result<Option<Self>, StoreError> {
        let meta_key = format!("{}/{METADATA_FILE}", key.as_str());
        let Some(bytes) = fs.get(&meta_key)? else {
            return Ok(None);
        };
        let meta: DatasetMetadata = serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::InvalidMetadata(key.as_str().to_string(), err.to_string()))?;
        // Chunk addressing assumes a growth axis chunked at 1.
        if meta.dtype != DTYPE_F32
            || meta.shape.len() != meta.chunk_shape.len()
            || meta.chunk_shape.first() != Some(&1)
        {
            return Err(StoreError::InvalidMetadata(
                key.as_str().to_string(),
                format!("unsupported dataset layout (dtype {})", meta.dtype),
            ));
        }
        Ok(Some(Self {
            fs: fs.clone(),
            key: key.clone(),
            meta,
        }))
    }

    /// Create the dataset under `key` from its first slice and the planned
    /// geometry, with an unbounded leading axis.
    pub(crate) fn create(
        fs: &Arc<FilesystemStore>,
        key: &RecordKey,
        first_slice: &ArrayD<f32>,
        geometry: &ChunkGeometry,
    ) -> Result<Self, StoreError> {
        let slice_shape: Vec<u64> = first_slice.shape().iter().map(|&d| d as u64).collect();
        let chunk_shape = geometry.resolve(&slice_shape);
        debug_assert_eq!(chunk_shape.len(), slice_shape.len() + 1);

        let mut shape = Vec::with_capacity(slice_shape.len() + 1);
        shape.push(0);
        shape.extend_from_slice(&slice_shape);
        let mut dataset = Self {
            fs: fs.clone(),
            key: key.clone(),
            meta: DatasetMetadata {
                shape,
                chunk_shape,
                dtype: DTYPE_F32.to_string(),
                compressor: Some(COMPRESSOR_ZSTD.to_string()),
            },
        };
        dataset.append(first_slice)?;
        Ok(dataset)
    }

    /// The shape of one slice (the dataset shape without the leading axis).
    pub(crate) fn slice_shape(&self) -> &[u64] {
        &self.meta.shape[1..]
    }

    /// The number of accumulated rows.
    pub(crate) fn num_rows(&self) -> u64 {
        self.meta.shape[0]
    }

    /// Append `slice` as the next row: write its chunks, then extend the
    /// leading axis and flush the metadata so readers observe the new length.
    pub(crate) fn append(&mut self, slice: &ArrayD<f32>) -> Result<(), StoreError> {
        let row = self.meta.shape[0];
        self.write_slice(row, slice)?;
        self.meta.shape[0] = row + 1;
        let meta_key = format!("{}/{METADATA_FILE}", self.key.as_str());
        self.fs.set(&meta_key, &serde_json::to_vec(&self.meta)?)?;
        Ok(())
    }

    /// A lazy handle over the dataset's rows.
    pub(crate) fn rows(&self) -> ArrayRows {
        ArrayRows {
            dataset: self.clone(),
        }
    }

    /// Chunk counts along each slice axis.
    fn grid_shape(&self) -> Vec<u64> {
        self.slice_shape()
            .iter()
            .zip(&self.meta.chunk_shape[1..])
            .map(|(&d, &s)| if s == 0 { 0 } else { d.div_ceil(s) })
            .collect()
    }

    /// The grid cells of one slice. A rank-0 slice has exactly one cell.
    fn grid_cells(&self) -> Vec<Vec<u64>> {
        let grid = self.grid_shape();
        if grid.is_empty() {
            return vec![Vec::new()];
        }
        grid.iter()
            .map(|&g| 0..g)
            .multi_cartesian_product()
            .collect()
    }

    fn chunk_key(&self, row: u64, cell: &[u64]) -> String {
        let mut key = format!("{}/{CHUNK_DIR}/{row}", self.key.as_str());
        for index in cell {
            key.push('/');
            key.push_str(&index.to_string());
        }
        key
    }

    /// The per-axis index ranges of `cell` within a slice.
    fn cell_ranges(&self, cell: &[u64]) -> Vec<(usize, usize)> {
        cell.iter()
            .zip(&self.meta.chunk_shape[1..])
            .zip(self.slice_shape())
            .map(|((&c, &s), &d)| {
                let start = c * s;
                let end = (start + s).min(d);
                (start as usize, end as usize)
            })
            .collect()
    }

    fn write_slice(&self, row: u64, slice: &ArrayD<f32>) -> Result<(), StoreError> {
        for cell in self.grid_cells() {
            let ranges = self.cell_ranges(&cell);
            let region = slice.slice(slice_info(&ranges)?);
            let data: Vec<f32> = region.iter().copied().collect();
            let mut bytes = f32s_to_le_bytes(&data);
            if self.meta.compressor.is_some() {
                bytes = zstd::encode_all(bytes.as_slice(), CHUNK_COMPRESSION_LEVEL)
                    .map_err(StoreError::IOError)?;
            }
            self.fs.set(&self.chunk_key(row, &cell), &bytes)?;
        }
        Ok(())
    }

    /// Read row `row` by reassembling its chunks.
    pub(crate) fn read_row(&self, row: u64) -> Result<ArrayD<f32>, StoreError> {
        if row >= self.num_rows() {
            return Err(StoreError::Other(format!(
                "row {row} is out of bounds for dataset {} of length {}",
                self.key,
                self.num_rows()
            )));
        }
        let slice_shape: Vec<usize> = self.slice_shape().iter().map(|&d| d as usize).collect();
        let mut out = ArrayD::<f32>::zeros(IxDyn(&slice_shape));
        for cell in self.grid_cells() {
            let chunk_key = self.chunk_key(row, &cell);
            let Some(mut bytes) = self.fs.get(&chunk_key)? else {
                return Err(StoreError::InvalidMetadata(
                    self.key.as_str().to_string(),
                    format!("missing chunk {chunk_key}"),
                ));
            };
            if self.meta.compressor.is_some() {
                bytes = zstd::decode_all(bytes.as_slice())
                    .map_err(|err| StoreError::InvalidMetadata(chunk_key.clone(), err.to_string()))?;
            }
            let data = f32s_from_le_bytes(&bytes)?;
            let ranges = self.cell_ranges(&cell);
            let region_shape: Vec<usize> = ranges.iter().map(|(start, end)| end - start).collect();
            let region = ArrayD::from_shape_vec(IxDyn(&region_shape), data)
                .map_err(|err| StoreError::InvalidMetadata(chunk_key, err.to_string()))?;
            out.slice_mut(slice_info(&ranges)?).assign(&region);
        }
        Ok(out)
    }
}

fn slice_info(
    ranges: &[(usize, usize)],
) -> Result<SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>, StoreError> {
    let elems: Vec<SliceInfoElem> = ranges
        .iter()
        .map(|&(start, end)| SliceInfoElem::Slice {
            start: start as isize,
            end: Some(end as isize),
            step: 1,
        })
        .collect();
    SliceInfo::try_from(elems).map_err(|err| StoreError::Other(err.to_string()))
}

/// A lazy sequence of accumulator rows.
///
/// Finite, restartable, and indexable without loading the whole dataset into
/// memory: each access reads only the chunks of the requested row.
#[derive(Clone, Debug)]
pub struct ArrayRows {
    dataset: Dataset,
}

impl ArrayRows {
    /// The number of rows.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.dataset.num_rows()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shape of one row.
    #[must_use]
    pub fn slice_shape(&self) -> &[u64] {
        self.dataset.slice_shape()
    }

    /// Read row `row`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if `row` is out of bounds or its chunks
    /// cannot be read.
    pub fn get(&self, row: u64) -> Result<ArrayD<f32>, StoreError> {
        self.dataset.read_row(row)
    }

    /// Iterate over the rows in order. Each call starts a fresh pass.
    #[must_use]
    pub fn iter(&self) -> RowIter<'_> {
        RowIter { rows: self, next: 0 }
    }

    /// Materialize every row in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] encountered.
    pub fn to_vec(&self) -> Result<Vec<ArrayD<f32>>, StoreError> {
        self.iter().collect()
    }
}

/// An iterator over the rows of an [`ArrayRows`].
#[derive(Debug)]
pub struct RowIter<'a> {
    rows: &'a ArrayRows,
    next: u64,
}

impl Iterator for RowIter<'_> {
    type Item = Result<ArrayD<f32>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.rows.len() {
            return None;
        }
        let row = self.rows.get(self.next);
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.rows.len() - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<'a> IntoIterator for &'a ArrayRows {
    type Item = Result<ArrayD<f32>, StoreError>;
    type IntoIter = RowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
