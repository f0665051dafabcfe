//! Dense Q1.31 vectors, matrices, and reductions.
//!
//! Storage is row-major and homogeneous. Dimensions are cycle-stable:
//! they change only through a committed reconfiguration, so a mismatch here
//! is an invariant violation at the caller, not a recoverable condition.
//!
//! The reductions follow the fabric's determinism rule: `dot` forms each
//! product with the fixed 64-bit multiply-and-shift, accumulates the shifted
//! terms in a 64-bit accumulator, and saturates exactly once at the end.
//! The compiler must not be given the chance to reassociate a floating
//! reduction, so there is none.

use crate::q31::{Q31, FRAC_BITS};
use crate::{FixedError, Result};
use serde::{Deserialize, Serialize};

/// A dense Q1.31 vector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QVector(Vec<Q31>);

impl QVector {
    /// Creates a vector from scalars.
    pub fn new(values: Vec<Q31>) -> Self {
        Self(values)
    }

    /// Creates a zero vector of the given length.
    pub fn zeros(len: usize) -> Self {
        Self(vec![Q31::ZERO; len])
    }

    /// Creates a vector from raw `i32` bit patterns.
    pub fn from_bits(bits: &[i32]) -> Self {
        Self(bits.iter().copied().map(Q31::from_bits).collect())
    }

    /// Creates a vector from floats (bootstrap path only).
    pub fn from_f64s(values: &[f64]) -> Self {
        Self(values.iter().copied().map(Q31::from_f64).collect())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The elements as a slice.
    pub fn as_slice(&self) -> &[Q31] {
        &self.0
    }

    /// The raw bit patterns, for wire encoding.
    pub fn to_bits(&self) -> Vec<i32> {
        self.0.iter().map(|q| q.to_bits()).collect()
    }

    /// Iterator over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, Q31> {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for QVector {
    type Output = Q31;

    fn index(&self, index: usize) -> &Q31 {
        &self.0[index]
    }
}

impl From<Vec<Q31>> for QVector {
    fn from(values: Vec<Q31>) -> Self {
        Self(values)
    }
}

/// A dense, row-major Q1.31 matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Q31>,
}

impl QMatrix {
    /// Creates a matrix from row-major data.
    ///
    /// Returns [`FixedError::DimensionMismatch`] if `data.len()` is not
    /// `rows * cols`.
    pub fn from_rows(rows: usize, cols: usize, data: Vec<Q31>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(FixedError::DimensionMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a matrix from nested float rows (bootstrap path only).
    pub fn from_f64_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let m = rows.len();
        let n = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(m * n);
        for row in rows {
            if row.len() != n {
                return Err(FixedError::DimensionMismatch {
                    expected: n,
                    actual: row.len(),
                });
            }
            data.extend(row.iter().copied().map(Q31::from_f64));
        }
        Self::from_rows(m, n, data)
    }

    /// The nearest-representable identity: `1 - 2^-31` on the diagonal.
    ///
    /// Q1.31 has no exact 1.0, so the diagonal carries [`Q31::MAX`].
    pub fn identity(n: usize) -> Self {
        let mut data = vec![Q31::ZERO; n * n];
        for i in 0..n {
            data[i * n + i] = Q31::MAX;
        }
        Self { rows: n, cols: n, data }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the matrix is square.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// One row as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `r >= rows()`; row indices come from the coded-block
    /// selector, which is bounded by construction.
    pub fn row(&self, r: usize) -> &[Q31] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }
}

/// Dot product of two Q1.31 vectors.
///
/// Each term is the fixed 64-bit multiply-and-shift; the shifted terms
/// accumulate in an `i64` and the sum saturates exactly once at the end.
pub fn dot(u: &[Q31], v: &[Q31]) -> Result<Q31> {
    dot_detect(u, v).map(|(value, _)| value)
}

/// Dot product that also reports whether the final accumulator saturated.
pub fn dot_detect(u: &[Q31], v: &[Q31]) -> Result<(Q31, bool)> {
    if u.len() != v.len() {
        return Err(FixedError::DimensionMismatch {
            expected: u.len(),
            actual: v.len(),
        });
    }
    // Each shifted term fits in 32 bits, so the i64 accumulator cannot wrap
    // for any practical width (< 2^31 terms).
    let mut acc: i64 = 0;
    for (a, b) in u.iter().zip(v.iter()) {
        acc += (i64::from(a.to_bits()) * i64::from(b.to_bits())) >> FRAC_BITS;
    }
    if acc > i64::from(i32::MAX) {
        Ok((Q31::MAX, true))
    } else if acc < i64::from(i32::MIN) {
        Ok((Q31::MIN, true))
    } else {
        Ok((Q31::from_bits(acc as i32), false))
    }
}

/// Matrix-vector product `y = M * x` in Q1.31.
///
/// `y[i] = dot(M.row(i), x)` for each row; this is the single-node oracle
/// the rateless decode must reproduce bit-for-bit.
pub fn matvec(m: &QMatrix, x: &[Q31]) -> Result<QVector> {
    if m.cols() != x.len() {
        return Err(FixedError::DimensionMismatch {
            expected: m.cols(),
            actual: x.len(),
        });
    }
    let mut out = Vec::with_capacity(m.rows());
    for r in 0..m.rows() {
        out.push(dot(m.row(r), x)?);
    }
    Ok(QVector::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_basic() {
        // 0.5 * 0.5 + 0.25 * 0.25 = 0.3125
        let u = QVector::from_bits(&[1 << 30, 1 << 29]);
        let v = u.clone();
        let d = dot(u.as_slice(), v.as_slice()).unwrap();
        assert_eq!(d.to_bits(), (1 << 29) + (1 << 27));
    }

    #[test]
    fn test_dot_dimension_mismatch() {
        let u = QVector::zeros(3);
        let v = QVector::zeros(4);
        let err = dot(u.as_slice(), v.as_slice()).unwrap_err();
        assert_eq!(err, FixedError::DimensionMismatch { expected: 3, actual: 4 });
    }

    #[test]
    fn test_dot_saturates_once_at_end() {
        // Sum of per-term maxima exceeds the range, but intermediate terms
        // are held in the 64-bit accumulator and only the end result clamps.
        let u = vec![Q31::MAX; 8];
        let v = vec![Q31::MAX; 8];
        let (d, sat) = dot_detect(&u, &v).unwrap();
        assert_eq!(d, Q31::MAX);
        assert!(sat);
    }

    #[test]
    fn test_dot_negative_accumulation() {
        let u = vec![Q31::MIN; 4];
        let v = vec![Q31::MAX; 4];
        let (d, sat) = dot_detect(&u, &v).unwrap();
        assert_eq!(d, Q31::MIN);
        assert!(sat);
    }

    #[test]
    fn test_matvec_zero_vector() {
        let m = QMatrix::identity(4);
        let x = QVector::zeros(4);
        let y = matvec(&m, x.as_slice()).unwrap();
        assert_eq!(y, QVector::zeros(4));
    }

    #[test]
    fn test_matvec_identity_one_ulp() {
        // The representable identity has 1 - 2^-31 on the diagonal, so
        // matvec(I, x) reproduces positive entries one ulp low.
        let m = QMatrix::identity(2);
        let x = QVector::from_bits(&[1 << 30, 0]);
        let y = matvec(&m, x.as_slice()).unwrap();
        assert_eq!(y[0].to_bits(), (1 << 30) - 1);
        assert_eq!(y[1], Q31::ZERO);
    }

    #[test]
    fn test_matvec_dimension_mismatch() {
        let m = QMatrix::identity(4);
        let x = QVector::zeros(3);
        assert!(matvec(&m, x.as_slice()).is_err());
    }

    #[test]
    fn test_matrix_shape_validation() {
        let err = QMatrix::from_rows(2, 3, vec![Q31::ZERO; 5]).unwrap_err();
        assert_eq!(err, FixedError::DimensionMismatch { expected: 6, actual: 5 });
    }

    #[test]
    fn test_matrix_row_access() {
        let m = QMatrix::from_rows(
            2,
            2,
            vec![
                Q31::from_bits(1),
                Q31::from_bits(2),
                Q31::from_bits(3),
                Q31::from_bits(4),
            ],
        )
        .unwrap();
        assert_eq!(m.row(1), &[Q31::from_bits(3), Q31::from_bits(4)]);
    }

    #[test]
    fn test_ragged_float_rows_rejected() {
        let rows = vec![vec![0.0, 0.5], vec![0.25]];
        assert!(QMatrix::from_f64_rows(&rows).is_err());
    }
}
