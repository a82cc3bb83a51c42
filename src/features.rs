use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A detected feature point. Positions are in pixels of the image the
/// keypoint is expressed in (original image once a sample is mapped back).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighbourhood
    pub size: f32,
    /// Orientation in degrees, -1 when not computed
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self {
            x,
            y,
            size,
            angle: -1.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }

    pub fn with_response(mut self, response: f32) -> Self {
        self.response = response;
        self
    }
}

/// Distance metric tag attached to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormType {
    L1,
    L2,
    Hamming,
    Hamming2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    Float,
    Binary,
}

impl DescriptorKind {
    pub fn name(self) -> &'static str {
        match self {
            DescriptorKind::Float => "float",
            DescriptorKind::Binary => "binary",
        }
    }
}

/// Element type and row width of a descriptor matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorLayout {
    pub kind: DescriptorKind,
    pub cols: usize,
}

impl DescriptorLayout {
    pub fn new(kind: DescriptorKind, cols: usize) -> Self {
        Self { kind, cols }
    }

    fn describe(&self) -> String {
        format!("{} x {}", self.kind.name(), self.cols)
    }
}

/// Borrowed view of a single descriptor row
#[derive(Debug, Clone, Copy)]
pub enum DescriptorRow<'a> {
    Float(&'a [f32]),
    Binary(&'a [u8]),
}

/// Row-major descriptor matrix; row `i` describes keypoint `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Descriptors {
    Float { cols: usize, data: Vec<f32> },
    Binary { cols: usize, data: Vec<u8> },
}

impl Descriptors {
    pub fn empty(layout: DescriptorLayout) -> Self {
        match layout.kind {
            DescriptorKind::Float => Descriptors::Float {
                cols: layout.cols,
                data: Vec::new(),
            },
            DescriptorKind::Binary => Descriptors::Binary {
                cols: layout.cols,
                data: Vec::new(),
            },
        }
    }

    pub fn layout(&self) -> DescriptorLayout {
        match self {
            Descriptors::Float { cols, .. } => DescriptorLayout::new(DescriptorKind::Float, *cols),
            Descriptors::Binary { cols, .. } => {
                DescriptorLayout::new(DescriptorKind::Binary, *cols)
            }
        }
    }

    pub fn cols(&self) -> usize {
        self.layout().cols
    }

    pub fn rows(&self) -> usize {
        let (cols, len) = match self {
            Descriptors::Float { cols, data } => (*cols, data.len()),
            Descriptors::Binary { cols, data } => (*cols, data.len()),
        };
        if cols == 0 {
            0
        } else {
            len / cols
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Fails unless the data splits into whole rows
    pub fn check_shape(&self) -> Result<()> {
        let (cols, len) = match self {
            Descriptors::Float { cols, data } => (*cols, data.len()),
            Descriptors::Binary { cols, data } => (*cols, data.len()),
        };
        let whole = if cols == 0 { len == 0 } else { len % cols == 0 };
        if whole {
            Ok(())
        } else {
            Err(Error::RaggedDescriptors { len, cols })
        }
    }

    pub fn row(&self, index: usize) -> DescriptorRow<'_> {
        match self {
            Descriptors::Float { cols, data } => {
                DescriptorRow::Float(&data[index * cols..(index + 1) * cols])
            }
            Descriptors::Binary { cols, data } => {
                DescriptorRow::Binary(&data[index * cols..(index + 1) * cols])
            }
        }
    }

    /// Append all rows of `other`. Empty inputs are accepted whatever their
    /// layout, since a failed sample contributes nothing.
    pub fn append(&mut self, other: &Descriptors) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        let expected = self.layout();
        match (self, other) {
            (Descriptors::Float { cols, data }, Descriptors::Float { cols: c, data: d })
                if *cols == *c =>
            {
                data.extend_from_slice(d);
                Ok(())
            }
            (Descriptors::Binary { cols, data }, Descriptors::Binary { cols: c, data: d })
                if *cols == *c =>
            {
                data.extend_from_slice(d);
                Ok(())
            }
            (_, other) => Err(Error::DescriptorLayout {
                expected: expected.describe(),
                got: other.layout().describe(),
            }),
        }
    }
}

/// Keypoints plus their row-aligned descriptors and the metric to compare
/// them with.
///
/// Deserialized sets go through [`FeatureSet::new`], so a loaded record
/// holds the same row/keypoint invariant as a computed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureSet")]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Descriptors,
    pub norm_type: NormType,
}

#[derive(Deserialize)]
struct RawFeatureSet {
    keypoints: Vec<KeyPoint>,
    descriptors: Descriptors,
    norm_type: NormType,
}

impl TryFrom<RawFeatureSet> for FeatureSet {
    type Error = Error;

    fn try_from(raw: RawFeatureSet) -> Result<Self> {
        FeatureSet::new(raw.keypoints, raw.descriptors, raw.norm_type)
    }
}

impl FeatureSet {
    pub fn new(keypoints: Vec<KeyPoint>, descriptors: Descriptors, norm_type: NormType) -> Result<Self> {
        let set = Self {
            keypoints,
            descriptors,
            norm_type,
        };
        set.check_shape()?;
        Ok(set)
    }

    /// Fails unless every keypoint has exactly one whole descriptor row.
    /// The fields are public, so consumers that index by row call this.
    pub fn check_shape(&self) -> Result<()> {
        self.descriptors.check_shape()?;
        if self.descriptors.rows() != self.keypoints.len() {
            return Err(Error::RowCount {
                rows: self.descriptors.rows(),
                keypoints: self.keypoints.len(),
            });
        }
        Ok(())
    }

    pub fn empty(layout: DescriptorLayout, norm_type: NormType) -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Descriptors::empty(layout),
            norm_type,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Concatenate per-sample sets in the order given.
    ///
    /// Keypoints and descriptor rows are appended part by part, so row `i` of
    /// the result still describes keypoint `i`. The reduction is pure: the
    /// same parts in the same order always give the same set.
    pub fn concat(layout: DescriptorLayout, norm_type: NormType, parts: &[FeatureSet]) -> Result<Self> {
        let total: usize = parts.iter().map(FeatureSet::len).sum();
        let mut merged = FeatureSet::empty(layout, norm_type);
        merged.keypoints.reserve(total);
        for part in parts {
            part.check_shape()?;
            merged.descriptors.append(&part.descriptors)?;
            merged.keypoints.extend_from_slice(&part.keypoints);
        }
        Ok(merged)
    }
}

/// A query/reference correspondence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}
