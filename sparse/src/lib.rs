use itertools::Itertools;
use nalgebra::DMatrix;
use std::iter::repeat;
use std::ops::{Add, Mul, Neg};
use std::sync::atomic::{AtomicUsize, Ordering};

use prelude::*;

/// Handle to a set of entries whose values can be overwritten after the matrix is built.
///
/// The sparsity pattern of a tracked block is fixed when it is created, so a solver can be
/// handed a new set of values without its symbolic factorisation being invalidated.
#[derive(Debug)]
pub struct BlockRef {
    id: usize,
    len: usize,
}

impl BlockRef {
    pub fn len(&self) -> usize {
        self.len
    }
}

#[derive(Clone, Debug)]
pub struct Builder {
    // (id, index of first coordinate, number of coordinates)
    tracked_blocks: Vec<(usize, usize, usize)>,
    coords: Vec<(usize, usize, float)>,
    nrows: usize,
    ncols: usize,
}

impl Builder {
    pub fn with_capacity(nrows: usize, ncols: usize, nnz: usize) -> Builder {
        Builder {
            tracked_blocks: Vec::new(),
            coords: Vec::with_capacity(nnz),
            nrows,
            ncols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.coords.len()
    }

    pub fn push(&mut self, r: usize, c: usize, val: float) {
        assert!(r < self.nrows && c < self.ncols, "entry ({}, {}) out of bounds", r, c);
        self.coords.push((r, c, val));
    }

    pub fn build_csc(&self) -> CscMatrix {
        // Sort by column then row, remembering where each coordinate ended up
        let mut order: Vec<usize> = (0..self.coords.len()).collect();
        order.sort_by_key(|&i| (self.coords[i].1, self.coords[i].0));

        // Sum any duplicates in the same cell
        let merged: Vec<(usize, usize, float, usize)> = order
            .iter()
            .map(|&i| {
                let (r, c, val) = self.coords[i];
                (r, c, val, 1)
            })
            .coalesce(|l, r| {
                if l.0 == r.0 && l.1 == r.1 {
                    Ok((l.0, l.1, l.2 + r.2, l.3 + r.3))
                } else {
                    Err((l, r))
                }
            })
            .collect();

        let mut position = vec![0; self.coords.len()];
        let slots = merged
            .iter()
            .enumerate()
            .flat_map(|(k, m)| repeat(k).take(m.3));
        for (&i, k) in order.iter().zip(slots) {
            position[i] = k;
        }

        let mut indptr = vec![0; self.ncols + 1];
        let mut indices = Vec::with_capacity(merged.len());
        let mut data = Vec::with_capacity(merged.len());

        // Fill in CSC column start and end pointer and row index
        for &(r, c, val, _) in &merged {
            indptr[c + 1] += 1;
            indices.push(r);
            data.push(val);
        }
        for c in 0..self.ncols {
            indptr[c + 1] += indptr[c];
        }

        let mut tracked_blocks = self
            .tracked_blocks
            .iter()
            .map(|&(id, first, len)| {
                let block_indices: Vec<usize> = position[first..first + len].to_vec();
                for &k in &block_indices {
                    assert_eq!(
                        merged[k].3, 1,
                        "tracked sparse entries must not overlap other entries"
                    );
                }
                (id, block_indices)
            })
            .collect::<Vec<_>>();

        tracked_blocks.sort_by_key(|b| b.0);

        CscMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data,
            tracked_blocks,
        }
    }
}

impl AsRef<Builder> for Builder {
    fn as_ref(&self) -> &Builder {
        self
    }
}

impl Add for Builder {
    type Output = Builder;

    fn add(self, other: Builder) -> Builder {
        add(&[self, other])
    }
}

impl<'a> Add<&'a Builder> for Builder {
    type Output = Builder;

    fn add(self, other: &'a Builder) -> Builder {
        add(&[&self, other])
    }
}

impl Mul<float> for Builder {
    type Output = Builder;

    fn mul(mut self, other: float) -> Builder {
        for &mut (_, _, ref mut val) in &mut self.coords {
            *val *= other;
        }
        self
    }
}

impl Neg for Builder {
    type Output = Builder;

    fn neg(mut self) -> Builder {
        for &mut (_, _, ref mut val) in &mut self.coords {
            *val = -*val;
        }
        self
    }
}

pub fn zeros(nrows: usize, ncols: usize) -> Builder {
    Builder::with_capacity(nrows, ncols, 0)
}

pub fn eye(n: usize) -> Builder {
    let mut builder = Builder::with_capacity(n, n, n);
    for i in 0..n {
        builder.coords.push((i, i, 1.0));
    }
    builder
}

/// Builds an `n` x `n` matrix with constant values along the given diagonals.
///
/// Positive offsets are above the main diagonal, negative offsets below it.
pub fn diags(n: usize, vals: &[float], diag: &[isize]) -> Builder {
    let cap = diag
        .iter()
        .map(|&d| n.saturating_sub(d.unsigned_abs()))
        .sum();
    let mut builder = Builder::with_capacity(n, n, cap);

    for (&k, &v) in diag.iter().zip(vals) {
        assert!(k.unsigned_abs() < n);
        if k >= 0 {
            let k = k as usize;
            for i in 0..(n - k) {
                builder.coords.push((i, i + k, v));
            }
        } else {
            let k = k.unsigned_abs();
            for i in 0..(n - k) {
                builder.coords.push((i + k, i, v));
            }
        }
    }
    builder
}

/// Creates a block with a fixed sparsity pattern whose values are set after building.
///
/// The values passed to `CscMatrix::set_block` are matched to `entries` by position.
pub fn pattern(nrows: usize, ncols: usize, entries: &[(usize, usize)]) -> (Builder, BlockRef) {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    let mut sorted = entries.to_vec();
    sorted.sort_unstable();
    assert!(
        sorted.windows(2).all(|w| w[0] != w[1]),
        "tracked pattern contains duplicate entries"
    );

    let mut builder = Builder::with_capacity(nrows, ncols, entries.len());
    for &(r, c) in entries {
        builder.push(r, c, 0.0);
    }

    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    builder.tracked_blocks.push((id, 0, entries.len()));

    (
        builder,
        BlockRef {
            id,
            len: entries.len(),
        },
    )
}

pub fn add<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    let (nrows, ncols) = blocks
        .get(0)
        .map(|b| b.as_ref().shape())
        .unwrap_or((0, 0));

    let mut acc = preallocate_for_merge(blocks);
    for block in blocks.iter().map(AsRef::as_ref) {
        assert_eq!(
            nrows, block.nrows,
            "matrices being added must have the same number of rows"
        );
        assert_eq!(
            ncols, block.ncols,
            "matrices being added must have the same number of columns"
        );
        block_merge(&mut acc, block, 0, 0);
    }
    acc.nrows = nrows;
    acc.ncols = ncols;
    acc
}

pub fn hstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    let nrows = blocks.get(0).map(|b| b.as_ref().nrows).unwrap_or(0);

    let mut acc = preallocate_for_merge(blocks);
    let mut ncols = 0;
    for block in blocks.iter().map(AsRef::as_ref) {
        assert_eq!(
            nrows, block.nrows,
            "hstack requires matrices to have the same number of rows"
        );
        block_merge(&mut acc, block, 0, ncols);
        ncols += block.ncols;
    }
    acc.nrows = nrows;
    acc.ncols = ncols;
    acc
}

pub fn vstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    let ncols = blocks.get(0).map(|b| b.as_ref().ncols).unwrap_or(0);

    let mut acc = preallocate_for_merge(blocks);
    let mut nrows = 0;
    for block in blocks.iter().map(AsRef::as_ref) {
        assert_eq!(
            ncols, block.ncols,
            "vstack requires matrices to have the same number of columns"
        );
        block_merge(&mut acc, block, nrows, 0);
        nrows += block.nrows;
    }
    acc.nrows = nrows;
    acc.ncols = ncols;
    acc
}

pub fn block_diag<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    let mut acc = preallocate_for_merge(blocks);
    let (mut nrows, mut ncols) = (0, 0);
    for block in blocks.iter().map(AsRef::as_ref) {
        block_merge(&mut acc, block, nrows, ncols);
        nrows += block.nrows;
        ncols += block.ncols;
    }
    acc.nrows = nrows;
    acc.ncols = ncols;
    acc
}

fn preallocate_for_merge<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    let (nnz, nt) = blocks.iter().map(AsRef::as_ref).fold((0, 0), |(nnz, nt), b| {
        (nnz + b.coords.len(), nt + b.tracked_blocks.len())
    });
    let mut builder = Builder::with_capacity(0, 0, nnz);
    builder.tracked_blocks = Vec::with_capacity(nt);
    builder
}

fn block_merge(left: &mut Builder, right: &Builder, row_shift: usize, col_shift: usize) {
    let left_coords_len = left.coords.len();

    left.coords
        .extend(right.coords.iter().map(|&(r, c, val)| (r + row_shift, c + col_shift, val)));

    // Tracked blocks keep their id but now start further into the coordinate list
    left.tracked_blocks.extend(
        right
            .tracked_blocks
            .iter()
            .map(|&(id, first, len)| (id, first + left_coords_len, len)),
    );
}

#[derive(Clone, Debug)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<float>,
    tracked_blocks: Vec<(usize, Vec<usize>)>,
}

impl CscMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[float] {
        &self.data
    }

    /// Overwrites every copy of a tracked block with `values`.
    pub fn set_block(&mut self, block: &BlockRef, values: &[float]) {
        assert_eq!(block.len, values.len());

        let start = self
            .tracked_blocks
            .partition_point(|&(id, _)| id < block.id);
        let end = self
            .tracked_blocks
            .partition_point(|&(id, _)| id <= block.id);
        assert!(start < end, "block not in this matrix");

        for (_, indices) in &self.tracked_blocks[start..end] {
            for (&index, &val) in indices.iter().zip(values) {
                self.data[index] = val;
            }
        }
    }

    pub fn is_upper_triangular(&self) -> bool {
        (0..self.ncols).all(|c| {
            self.indices[self.indptr[c]..self.indptr[c + 1]]
                .iter()
                .all(|&r| r <= c)
        })
    }

    /// Computes `S x` where `S` is the symmetric matrix whose upper triangle this matrix holds.
    pub fn symmetric_mul_vec(&self, x: &[float]) -> Vec<float> {
        assert_eq!(self.nrows, self.ncols);
        assert_eq!(x.len(), self.ncols);
        let mut y = vec![0.0; self.nrows];
        for c in 0..self.ncols {
            for i in self.indptr[c]..self.indptr[c + 1] {
                let r = self.indices[i];
                y[r] += self.data[i] * x[c];
                if r != c {
                    y[c] += self.data[i] * x[r];
                }
            }
        }
        y
    }

    pub fn to_dense(&self) -> DMatrix<float> {
        let mut mat = DMatrix::zeros(self.nrows, self.ncols);

        for c in 0..self.ncols {
            for i in self.indptr[c]..self.indptr[c + 1] {
                let r = self.indices[i];
                mat[(r, c)] = self.data[i];
            }
        }

        mat
    }
}
