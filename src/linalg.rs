use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use thiserror::Error;

/// Dense systems larger than this are rejected
const MAX_DENSE_SIZE: usize = 1000;

/// Sparse systems up to this size are factored directly; larger ones use preconditioned conjugate gradients
const MAX_DIRECT_SIZE: usize = 400;

/// Relative residual at which conjugate gradient iterations stop
const CG_TOLERANCE: f64 = 1e-13;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinearSolveError {
    #[error("system of size {0} is not symmetric positive definite")]
    NotPositiveDefinite(usize),
    #[error("system is {rows} x {rows}, but the right hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, rhs: usize },
    #[error("system of size {0} is too large for a dense solve")]
    ProblemTooLarge(usize),
    #[error("conjugate gradients did not converge in {0} iterations")]
    NotConverged(usize),
}

/// Solve `Ax = b` for a small dense symmetric positive definite `A` using Nalgebra's Cholesky Decomposition
pub fn solve_spd(a: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, LinearSolveError> {
    let rows = a.nrows();
    if rows > MAX_DENSE_SIZE {
        return Err(LinearSolveError::ProblemTooLarge(rows));
    }
    if a.ncols() != rows || b.len() != rows {
        return Err(LinearSolveError::DimensionMismatch { rows, rhs: b.len() });
    }

    match a.cholesky() {
        Some(cholesky_decomp) => {
            let x = cholesky_decomp.solve(b);
            if x.iter().all(|v| v.is_finite()) {
                Ok(x)
            } else {
                Err(LinearSolveError::NotPositiveDefinite(rows))
            }
        }
        None => Err(LinearSolveError::NotPositiveDefinite(rows)),
    }
}

/// Kronecker product of two square matrices, indexed so that `(i, j)` pairs are laid out row-major in `i`
pub fn kron(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    a.kronecker(b)
}

/// Square symmetric matrix stored by its upper triangle
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    dimension: usize,
    entries: BTreeMap<[usize; 2], f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored (upper triangular) entries
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Add a value to an entry. Assumes symmetry: row/col order does not matter.
    pub fn insert(&mut self, [row, col]: [usize; 2], value: f64) {
        debug_assert!(row < self.dimension && col < self.dimension);
        let coordinates = if row <= col { [row, col] } else { [col, row] };
        *self.entries.entry(coordinates).or_insert(0.0) += value;
    }

    /// Insert a group of entries
    pub fn insert_group(&mut self, entry_group: Vec<([usize; 2], f64)>) {
        for (coordinates, value) in entry_group {
            self.insert(coordinates, value);
        }
    }

    pub fn diagonal(&self) -> DVector<f64> {
        let mut diagonal = DVector::zeros(self.dimension);
        for ([r, c], value) in self.entries.iter() {
            if r == c {
                diagonal[*r] += value;
            }
        }
        diagonal
    }

    /// Iterate over the upper triangle of the matrix.
    pub fn iter_upper_tri(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries.iter().map(|(coordinates, value)| (*coordinates, *value))
    }

    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        symmetric_product(self.dimension, self.iter_upper_tri(), x)
    }
}

fn symmetric_product(dimension: usize, upper_tri: impl Iterator<Item = ([usize; 2], f64)>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(dimension);
    for ([r, c], value) in upper_tri {
        y[r] += value * x[c];
        if r != c {
            y[c] += value * x[r];
        }
    }
    y
}

impl From<SparseMatrix> for DMatrix<f64> {
    fn from(sm: SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(sm.dimension, sm.dimension);
        for ([r, c], v) in sm.iter_upper_tri() {
            dense[(r, c)] = v;
            dense[(c, r)] = v;
        }
        dense
    }
}

/// Solve `Ax = b` for a sparse symmetric positive definite `A`
pub fn solve_sparse_spd(a: SparseMatrix, b: &DVector<f64>) -> Result<DVector<f64>, LinearSolveError> {
    let rows = a.dimension();
    if b.len() != rows {
        return Err(LinearSolveError::DimensionMismatch { rows, rhs: b.len() });
    }

    if rows <= MAX_DIRECT_SIZE {
        solve_spd(DMatrix::from(a), b)
    } else {
        conjugate_gradient(&a, b)
    }
}

/// Jacobi-preconditioned conjugate gradients, starting from zero
fn conjugate_gradient(a: &SparseMatrix, b: &DVector<f64>) -> Result<DVector<f64>, LinearSolveError> {
    let rows = a.dimension();
    let max_iterations = 10 * rows;

    let diagonal = a.diagonal();
    if diagonal.iter().any(|d| *d <= 0.0) {
        return Err(LinearSolveError::NotPositiveDefinite(rows));
    }

    let upper_tri: Vec<([usize; 2], f64)> = a.iter_upper_tri().collect();

    let mut x = DVector::zeros(rows);
    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok(x);
    }

    let mut r = b.clone();
    let mut z = r.component_div(&diagonal);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for _ in 0..max_iterations {
        let q = symmetric_product(rows, upper_tri.iter().copied(), &p);
        let pq = p.dot(&q);
        if pq <= 0.0 {
            return Err(LinearSolveError::NotPositiveDefinite(rows));
        }

        let alpha = rz / pq;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &q, 1.0);

        if r.norm() <= CG_TOLERANCE * b_norm {
            return Ok(x);
        }

        z = r.component_div(&diagonal);
        let rz_next = r.dot(&z);
        p = &z + &p * (rz_next / rz);
        rz = rz_next;
    }

    Err(LinearSolveError::NotConverged(max_iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 1D Laplacian plus identity: tridiagonal and diagonally dominant
    fn tridiagonal(n: usize) -> SparseMatrix {
        let mut matrix = SparseMatrix::new(n);
        for i in 0..n {
            matrix.insert([i, i], 3.0);
            if i + 1 < n {
                matrix.insert([i + 1, i], -1.0);
            }
        }
        matrix
    }

    #[test]
    fn spd_solve() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = solve_spd(a, &b).unwrap();

        assert_relative_eq!(x[0], 1.0 / 11.0, epsilon = 1e-14);
        assert_relative_eq!(x[1], 7.0 / 11.0, epsilon = 1e-14);
    }

    #[test]
    fn rejects_bad_systems() {
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(solve_spd(indefinite, &b), Err(LinearSolveError::NotPositiveDefinite(2)));

        let a = DMatrix::identity(3, 3);
        assert_eq!(
            solve_spd(a, &b),
            Err(LinearSolveError::DimensionMismatch { rows: 3, rhs: 2 })
        );
        assert_eq!(
            solve_sparse_spd(tridiagonal(3), &b),
            Err(LinearSolveError::DimensionMismatch { rows: 3, rhs: 2 })
        );
    }

    #[test]
    fn kronecker_layout() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DMatrix::identity(2, 2);
        let k = kron(&a, &b);

        // row (i=1, j=0) = 2, column (k=0, l=0) = 0
        assert_eq!(k[(2, 0)], 3.0);
        assert_eq!(k[(2, 1)], 0.0);
        assert_eq!(k[(3, 3)], 4.0);
    }

    #[test]
    fn symmetric_storage() {
        let mut matrix = SparseMatrix::new(3);
        matrix.insert_group(vec![([0, 2], 1.5), ([2, 0], 0.5), ([1, 1], 2.0)]);
        assert_eq!(matrix.num_entries(), 2);

        let dense = DMatrix::from(matrix.clone());
        assert_eq!(dense[(0, 2)], 2.0);
        assert_eq!(dense[(2, 0)], 2.0);

        let y = matrix.mul_vec(&DVector::from_vec(vec![1.0, 1.0, 1.0]));
        assert_eq!(y.as_slice(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn direct_and_iterative_solves_agree() {
        for n in [50, MAX_DIRECT_SIZE + 100] {
            let matrix = tridiagonal(n);
            let expected = DVector::from_fn(n, |i, _| (i as f64 * 0.37).sin());
            let b = matrix.mul_vec(&expected);

            let x = solve_sparse_spd(matrix, &b).unwrap();
            assert_relative_eq!(x, expected, epsilon = 1e-10);
        }
    }
}
