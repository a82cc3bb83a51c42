//! Nearest-neighbour search over a reference descriptor matrix.
//!
//! Float descriptors compared with L2 go into an exact kd-tree. Binary
//! descriptors compared with Hamming go into a multi-table LSH index whose
//! candidates are re-ranked by true distance.

use std::collections::HashMap;

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::{DescriptorKind, DescriptorRow, Descriptors, NormType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Maximum number of points in a kd-tree leaf
    pub leaf_size: usize,
    /// Number of LSH hash tables
    pub lsh_tables: usize,
    /// Bits per LSH key, at most 32
    pub lsh_key_bits: usize,
    /// Also probe buckets whose key differs in up to this many bits (0 or 1)
    pub lsh_probe_level: u32,
    /// Seed for the LSH bit selection
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            leaf_size: 8,
            lsh_tables: 6,
            lsh_key_bits: 12,
            lsh_probe_level: 1,
            seed: 0x1f2e_3d4c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_l2(a, b).sqrt()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Index over the rows of a reference descriptor matrix
#[derive(Debug, Clone)]
pub enum DescriptorIndex {
    KdTree(KdTree),
    Lsh(LshIndex),
}

impl DescriptorIndex {
    /// Build the index matching `norm`.
    ///
    /// Only L2 over float rows and Hamming over binary rows are indexable.
    pub fn build(descriptors: &Descriptors, norm: NormType, params: &IndexParams) -> Result<Self> {
        match (norm, descriptors) {
            (NormType::L2, Descriptors::Float { cols, data }) => Ok(DescriptorIndex::KdTree(
                KdTree::build(data.clone(), *cols, params.leaf_size),
            )),
            (NormType::Hamming, Descriptors::Binary { cols, data }) => {
                Ok(DescriptorIndex::Lsh(LshIndex::build(data.clone(), *cols, params)))
            }
            (NormType::L2, Descriptors::Binary { .. }) | (NormType::Hamming, Descriptors::Float { .. }) => {
                Err(Error::NormMismatch {
                    norm,
                    kind: descriptors.layout().kind.name(),
                })
            }
            (NormType::L1 | NormType::Hamming2, _) => Err(Error::UnsupportedNorm(norm)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DescriptorIndex::KdTree(tree) => tree.len(),
            DescriptorIndex::Lsh(lsh) => lsh.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            DescriptorIndex::KdTree(_) => DescriptorKind::Float,
            DescriptorIndex::Lsh(_) => DescriptorKind::Binary,
        }
    }

    /// Up to `k` nearest rows, closest first; ties go to the lower index
    pub fn knn(&self, query: DescriptorRow<'_>, k: usize) -> Result<Vec<Neighbor>> {
        match (self, query) {
            (DescriptorIndex::KdTree(tree), DescriptorRow::Float(q)) if q.len() == tree.cols => {
                Ok(tree.knn(q, k))
            }
            (DescriptorIndex::Lsh(lsh), DescriptorRow::Binary(q)) if q.len() == lsh.cols => {
                Ok(lsh.knn(q, k))
            }
            (index, query) => {
                let (kind, cols) = match query {
                    DescriptorRow::Float(q) => (DescriptorKind::Float, q.len()),
                    DescriptorRow::Binary(q) => (DescriptorKind::Binary, q.len()),
                };
                Err(Error::DescriptorLayout {
                    expected: format!("{} x {}", index.kind().name(), index.cols()),
                    got: format!("{} x {}", kind.name(), cols),
                })
            }
        }
    }

    fn cols(&self) -> usize {
        match self {
            DescriptorIndex::KdTree(tree) => tree.cols,
            DescriptorIndex::Lsh(lsh) => lsh.cols,
        }
    }
}

/// Running set of the best `k` candidates, sorted by (distance, index)
struct BestK {
    k: usize,
    items: Vec<Neighbor>,
}

impl BestK {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    fn worst(&self) -> f32 {
        if self.items.len() < self.k {
            f32::INFINITY
        } else {
            self.items.last().map_or(f32::INFINITY, |n| n.distance)
        }
    }

    fn offer(&mut self, index: usize, distance: f32) {
        if self.k == 0 {
            return;
        }
        let pos = self
            .items
            .partition_point(|n| (n.distance, n.index) < (distance, index));
        if pos >= self.k {
            return;
        }
        self.items.insert(pos, Neighbor { index, distance });
        self.items.truncate(self.k);
    }
}

#[derive(Debug, Clone)]
enum KdNode {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

/// Exact kd-tree over float rows
#[derive(Debug, Clone)]
pub struct KdTree {
    data: Vec<f32>,
    cols: usize,
    order: Vec<usize>,
    nodes: Vec<KdNode>,
}

impl KdTree {
    pub fn build(data: Vec<f32>, cols: usize, leaf_size: usize) -> Self {
        let rows = if cols == 0 { 0 } else { data.len() / cols };
        let mut tree = Self {
            data,
            cols,
            order: (0..rows).collect(),
            nodes: Vec::new(),
        };
        if rows > 0 {
            tree.build_node(0, rows, leaf_size.max(1));
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn point(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    fn build_node(&mut self, start: usize, end: usize, leaf_size: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(KdNode::Leaf { start, end });
        if end - start <= leaf_size {
            return id;
        }

        // Split along the dimension with the widest spread
        let mut dim = 0;
        let mut widest = 0.0f32;
        for d in 0..self.cols {
            let (lo, hi) = self.order[start..end]
                .iter()
                .map(|&r| self.data[r * self.cols + d])
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            if hi - lo > widest {
                widest = hi - lo;
                dim = d;
            }
        }
        if widest == 0.0 {
            return id;
        }

        let mid = start + (end - start) / 2;
        let (data, cols) = (&self.data, self.cols);
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            data[a * cols + dim].total_cmp(&data[b * cols + dim])
        });
        let value = self.data[self.order[mid] * cols + dim];

        let left = self.build_node(start, mid, leaf_size);
        let right = self.build_node(mid, end, leaf_size);
        self.nodes[id] = KdNode::Split {
            dim,
            value,
            left,
            right,
        };
        id
    }

    pub fn knn(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut best = BestK::new(k);
        if !self.nodes.is_empty() {
            self.search(0, query, &mut best);
        }
        best.items
            .into_iter()
            .map(|n| Neighbor {
                index: n.index,
                distance: n.distance.sqrt(),
            })
            .collect()
    }

    // Distances stay squared during the descent
    fn search(&self, node: usize, query: &[f32], best: &mut BestK) {
        match self.nodes[node] {
            KdNode::Leaf { start, end } => {
                for &row in &self.order[start..end] {
                    best.offer(row, squared_l2(self.point(row), query));
                }
            }
            KdNode::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[dim] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.search(near, query, best);
                if diff * diff <= best.worst() {
                    self.search(far, query, best);
                }
            }
        }
    }
}

/// Locality-sensitive hashing over binary rows.
///
/// Each table keys a row by a fixed random subset of its bits. A query
/// gathers the rows sharing a bucket with it in any table (plus the
/// neighbouring buckets when multi-probing), then ranks them by Hamming
/// distance. When that yields fewer than `k` candidates every row is scanned.
#[derive(Debug, Clone)]
pub struct LshIndex {
    data: Vec<u8>,
    cols: usize,
    key_bits: usize,
    probe_level: u32,
    tables: Vec<LshTable>,
}

#[derive(Debug, Clone)]
struct LshTable {
    bits: Vec<usize>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl LshTable {
    fn key(&self, row: &[u8]) -> u32 {
        self.bits.iter().enumerate().fold(0u32, |key, (i, &bit)| {
            if (row[bit / 8] >> (bit % 8)) & 1 == 1 {
                key | (1 << i)
            } else {
                key
            }
        })
    }
}

impl LshIndex {
    pub fn build(data: Vec<u8>, cols: usize, params: &IndexParams) -> Self {
        let total_bits = cols * 8;
        let key_bits = params.lsh_key_bits.min(32).min(total_bits);
        let rows = if cols == 0 { 0 } else { data.len() / cols };

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut tables = Vec::with_capacity(params.lsh_tables);
        for _ in 0..params.lsh_tables {
            let mut table = LshTable {
                bits: sample(&mut rng, total_bits, key_bits).into_vec(),
                buckets: HashMap::new(),
            };
            for row in 0..rows {
                let key = table.key(&data[row * cols..(row + 1) * cols]);
                table.buckets.entry(key).or_default().push(row);
            }
            tables.push(table);
        }

        Self {
            data,
            cols,
            key_bits,
            probe_level: params.lsh_probe_level,
            tables,
        }
    }

    pub fn len(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, row: usize) -> &[u8] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    fn candidates(&self, query: &[u8]) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut out = Vec::new();
        for table in &self.tables {
            let key = table.key(query);
            let mut probes = vec![key];
            if self.probe_level > 0 {
                probes.extend((0..self.key_bits).map(|b| key ^ (1 << b)));
            }
            for probe in probes {
                for &row in table.buckets.get(&probe).into_iter().flatten() {
                    if !seen[row] {
                        seen[row] = true;
                        out.push(row);
                    }
                }
            }
        }
        out
    }

    pub fn knn(&self, query: &[u8], k: usize) -> Vec<Neighbor> {
        let mut candidates = self.candidates(query);
        if candidates.len() < k {
            candidates = (0..self.len()).collect();
        }
        let mut best = BestK::new(k);
        for row in candidates {
            best.offer(row, hamming_distance(self.row(row), query) as f32);
        }
        best.items
    }
}
