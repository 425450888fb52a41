//! Row-major `f32` array blocks.
//!
//! A [`Block`] is the single array type that flows through the pipeline: the
//! input batch, every shard cut from it, every stage output and the assembled
//! result. Axis 0 is always the row axis; the remaining axes form the
//! *row shape*, which must agree between blocks that are concatenated.

use std::ops::Range;

use crate::device::DeviceId;
use crate::error::{Result, TandemError};

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    device: DeviceId,
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl Block {
    /// Wrap `data` as an array of shape `dims` resident on `device`.
    pub fn new(device: DeviceId, dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if dims.is_empty() {
            return Err(TandemError::Shape("block needs at least a row axis".into()));
        }
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(TandemError::Shape(format!(
                "dims {dims:?} need {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { device, dims, data })
    }

    /// `rows` rows of zeros with the given row shape.
    pub fn zeros(device: DeviceId, rows: usize, row_shape: &[usize]) -> Self {
        let mut dims = Vec::with_capacity(row_shape.len() + 1);
        dims.push(rows);
        dims.extend_from_slice(row_shape);
        let len = dims.iter().product();
        Self {
            device,
            dims,
            data: vec![0.0; len],
        }
    }

    /// A block with zero rows and the given row shape.
    pub fn empty(device: DeviceId, row_shape: &[usize]) -> Self {
        let mut dims = Vec::with_capacity(row_shape.len() + 1);
        dims.push(0);
        dims.extend_from_slice(row_shape);
        Self {
            device,
            dims,
            data: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rows(&self) -> usize {
        self.dims[0]
    }

    pub fn row_shape(&self) -> &[usize] {
        &self.dims[1..]
    }

    /// Number of scalars in one row.
    pub fn row_len(&self) -> usize {
        self.row_shape().iter().product()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows() {
            return None;
        }
        let w = self.row_len();
        Some(&self.data[i * w..(i + 1) * w])
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    // ── Row operations ───────────────────────────────────────────────────

    /// Copy rows `range` into a new block on the same device.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.rows() {
            return Err(TandemError::Shape(format!(
                "row range {range:?} out of bounds for {} rows",
                self.rows()
            )));
        }
        let w = self.row_len();
        let mut dims = self.dims.clone();
        dims[0] = range.len();
        Ok(Self {
            device: self.device,
            dims,
            data: self.data[range.start * w..range.end * w].to_vec(),
        })
    }

    /// Concatenate `parts` along the row axis, in order.
    ///
    /// Every part must share the row shape of the first one. An empty
    /// slice is rejected because the row shape would be unknown.
    pub fn concat_rows(parts: &[Block], device: DeviceId) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TandemError::Shape("nothing to concatenate".into()))?;
        let row_shape = first.row_shape();

        let mut rows = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.row_shape() != row_shape {
                return Err(TandemError::Shape(format!(
                    "part {i} has row shape {:?}, expected {row_shape:?}",
                    part.row_shape()
                )));
            }
            rows += part.rows();
        }

        let mut data = Vec::with_capacity(rows * first.row_len());
        for part in parts {
            data.extend_from_slice(&part.data);
        }

        let mut dims = first.dims.clone();
        dims[0] = rows;
        Ok(Self { device, dims, data })
    }

    /// Synchronous copy into another memory space.
    pub fn to_device(&self, device: DeviceId) -> Self {
        Self {
            device,
            dims: self.dims.clone(),
            data: self.data.clone(),
        }
    }

    /// Largest element-wise absolute difference, or `None` if shapes differ.
    pub fn max_abs_diff(&self, other: &Block) -> Option<f32> {
        if self.dims != other.dims {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
