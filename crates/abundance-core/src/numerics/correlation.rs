use faer::Mat;

pub const STELLAR_PARAMETER_COUNT: usize = 4;
const SYMMETRY_TOLERANCE: f64 = 1.0e-9;
// Rounding can push eᵀRe slightly below zero for a semidefinite R.
const NEGATIVE_QUADRATIC_TOLERANCE: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelationError {
    #[error("correlation matrix must be {expected}x{expected}, got {rows}x{cols}")]
    Shape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("correlation matrix entry ({row}, {col}) is not finite")]
    NonFinite { row: usize, col: usize },
    #[error("correlation matrix is not symmetric at ({row}, {col})")]
    Asymmetric { row: usize, col: usize },
    #[error("correlation matrix is not positive semidefinite (eᵀRe = {value})")]
    NotPositiveSemidefinite { value: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    matrix: Mat<f64>,
}

impl CorrelationMatrix {
    pub fn identity() -> Self {
        Self {
            matrix: Mat::from_fn(
                STELLAR_PARAMETER_COUNT,
                STELLAR_PARAMETER_COUNT,
                |row, col| if row == col { 1.0 } else { 0.0 },
            ),
        }
    }

    pub fn from_rows(rows: [[f64; STELLAR_PARAMETER_COUNT]; STELLAR_PARAMETER_COUNT]) -> Result<Self, CorrelationError> {
        Self::from_matrix(Mat::from_fn(
            STELLAR_PARAMETER_COUNT,
            STELLAR_PARAMETER_COUNT,
            |row, col| rows[row][col],
        ))
    }

    pub fn from_matrix(matrix: Mat<f64>) -> Result<Self, CorrelationError> {
        if matrix.nrows() != STELLAR_PARAMETER_COUNT || matrix.ncols() != STELLAR_PARAMETER_COUNT {
            return Err(CorrelationError::Shape {
                expected: STELLAR_PARAMETER_COUNT,
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        for row in 0..STELLAR_PARAMETER_COUNT {
            for col in 0..STELLAR_PARAMETER_COUNT {
                if !matrix[(row, col)].is_finite() {
                    return Err(CorrelationError::NonFinite { row, col });
                }
                if (matrix[(row, col)] - matrix[(col, row)]).abs() > SYMMETRY_TOLERANCE {
                    return Err(CorrelationError::Asymmetric { row, col });
                }
            }
        }
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &Mat<f64> {
        &self.matrix
    }

    pub fn quadratic_form(&self, shifts: &[f64; STELLAR_PARAMETER_COUNT]) -> f64 {
        let mut total = 0.0;
        for row in 0..STELLAR_PARAMETER_COUNT {
            let mut projected = 0.0;
            for col in 0..STELLAR_PARAMETER_COUNT {
                projected += self.matrix[(row, col)] * shifts[col];
            }
            total += shifts[row] * projected;
        }
        total
    }

    /// Combined systematic error sqrt(eᵀ R e). NaN shifts propagate as NaN.
    pub fn combined_error(
        &self,
        shifts: &[f64; STELLAR_PARAMETER_COUNT],
    ) -> Result<f64, CorrelationError> {
        let value = self.quadratic_form(shifts);
        if value.is_nan() {
            return Ok(f64::NAN);
        }
        if value < -NEGATIVE_QUADRATIC_TOLERANCE {
            return Err(CorrelationError::NotPositiveSemidefinite { value });
        }
        Ok(value.max(0.0).sqrt())
    }
}

impl Default for CorrelationMatrix {
    fn default() -> Self {
        Self::identity()
    }
}
