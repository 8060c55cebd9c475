//! Bridge between `ndarray` arrays and faer's dense SVD and Cholesky kernels.

use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::solvers::{self, Solve};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

/// Either a zero-copy faer view over contiguous ndarray memory or an owned copy.
enum Operand<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl Operand<'_> {
    fn mat(&self) -> MatRef<'_, f64> {
        match self {
            Operand::Borrowed(view) => *view,
            Operand::Owned(mat) => mat.as_ref(),
        }
    }
}

fn operand<S: Data<Elem = f64>>(array: &ArrayBase<S, Ix2>) -> Operand<'_> {
    let (rows, cols) = array.dim();
    match array.as_slice_memory_order() {
        Some(slice) if array.is_standard_layout() => {
            Operand::Borrowed(MatRef::from_row_major_slice(slice, rows, cols))
        }
        Some(slice) if array.t().is_standard_layout() => {
            Operand::Borrowed(MatRef::from_column_major_slice(slice, rows, cols))
        }
        _ => Operand::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
    }
}

/// Thin singular value decomposition `A = U diag(S) V^T`.
///
/// For an `m x n` input with `k = min(m, n)`, returns `U` as `m x k`, `S` of
/// length `k` and `V` (not transposed) as `n x k`. Column `i` of `U` and `V`
/// pairs with `S[i]`.
pub trait FaerSvd {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let input = operand(self);
        let faer_mat = input.mat();
        let (rows, cols) = faer_mat.shape();
        let rank_bound = rows.min(cols);

        let mut singular = Diag::<f64>::zeros(rank_bound);
        let mut u_storage = Mat::<f64>::zeros(rows, rank_bound);
        let mut v_storage = Mat::<f64>::zeros(cols, rank_bound);

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::Thin,
            ComputeSvdVectors::Thin,
            par,
            Default::default(),
        ));
        let mut stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            Some(u_storage.as_mut()),
            Some(v_storage.as_mut()),
            par,
            &mut stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        Ok((
            mat_to_array(u_storage.as_ref()),
            diag_to_array(singular.as_ref()),
            mat_to_array(v_storage.as_ref()),
        ))
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    /// Solves `A x = rhs` for a single right-hand side.
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let column = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        let sol = self.factor.solve(column.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| sol[(i, 0)])
    }

    /// Solves `A X = rhs` column by column.
    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let sol = self.factor.solve(operand(rhs).mat());
        mat_to_array(sol.as_ref())
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let factor = operand(self)
            .mat()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn thin_svd_reconstructs_tall_matrix() {
        let mut rng = StdRng::seed_from_u64(42);
        let matrix = random_matrix(30, 6, &mut rng);

        let (u, s, v) = matrix.thin_svd().unwrap();
        assert_eq!(u.dim(), (30, 6));
        assert_eq!(s.len(), 6);
        assert_eq!(v.dim(), (6, 6));

        let scaled_u = &u * &s;
        let rebuilt = scaled_u.dot(&v.t());
        for (a, b) in rebuilt.iter().zip(matrix.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }

        let utu = u.t().dot(&u);
        let vtv = v.t().dot(&v);
        for i in 0..6 {
            for j in 0..6 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(utu[(i, j)], expected, epsilon = 1e-10);
                assert_abs_diff_eq!(vtv[(i, j)], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn thin_svd_handles_wide_matrix() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrix = random_matrix(3, 8, &mut rng);

        let (u, s, v) = matrix.thin_svd().unwrap();
        assert_eq!(u.dim(), (3, 3));
        assert_eq!(s.len(), 3);
        assert_eq!(v.dim(), (8, 3));

        let rebuilt = (&u * &s).dot(&v.t());
        for (a, b) in rebuilt.iter().zip(matrix.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn transposed_and_strided_inputs_match_contiguous() {
        let mut rng = StdRng::seed_from_u64(5);
        let matrix = random_matrix(12, 4, &mut rng);
        let column_major = matrix.t().to_owned().reversed_axes();
        let (_, s_row, _) = matrix.thin_svd().unwrap();
        let (_, s_col, _) = column_major.thin_svd().unwrap();

        let wide = random_matrix(12, 8, &mut rng);
        let strided = wide.slice(ndarray::s![.., ..;2]).to_owned();
        let (_, s_strided, _) = wide.slice(ndarray::s![.., ..;2]).thin_svd().unwrap();
        let (_, s_copy, _) = strided.thin_svd().unwrap();

        for (a, b) in s_row.iter().zip(s_col.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        for (a, b) in s_strided.iter().zip(s_copy.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn cholesky_solves_spd_system() {
        let spd = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.25], [0.5, 0.25, 2.0]];
        let rhs = array![1.0, -2.0, 0.5];

        let factor = spd.cholesky(Side::Lower).unwrap();
        let x = factor.solve_vec(&rhs);
        let back = spd.dot(&x);
        for (a, b) in back.iter().zip(rhs.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }

        let inverse = factor.solve_mat(&Array2::eye(3));
        let identity = spd.dot(&inverse);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(identity[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let indefinite = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            indefinite.cholesky(Side::Lower),
            Err(FaerLinalgError::Cholesky(_))
        ));
    }
}
