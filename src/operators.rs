/*!
Linear operators on flattened images, and the total-variation prox built on them.

Images are stored row-major as `Array1<f64>` of length `rows · cols`, which is also the
state layout used by the imaging samplers.

# Examples

```rust
use prox_langevin::operators::{Convolution2D, LinearOperator};
use ndarray::Array1;

let blur = Convolution2D::uniform(8, 8, 3).unwrap();
let flat = Array1::from_elem(64, 2.0);
let blurred = blur.forward(flat.view());
assert!((blurred[10] - 2.0).abs() < 1e-12);
```
*/

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::algorithm::SubSolverConfig;
use crate::distributions::Proximal;
use crate::error::{ensure_positive_parameter, LangevinError, Result};
use crate::prox::MixedNorm;

/// A real linear map `K: ℝⁿ → ℝᵐ` together with its adjoint.
pub trait LinearOperator {
    /// `n`.
    fn input_dim(&self) -> usize;

    /// `m`.
    fn output_dim(&self) -> usize;

    /// `Kx`.
    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64>;

    /// `Kᵀz`.
    fn adjoint(&self, z: ArrayView1<f64>) -> Array1<f64>;

    /// `‖K‖₂²`, or an upper bound on it. Defaults to a power-iteration estimate.
    fn norm_squared(&self) -> f64 {
        power_iteration(self, 500, 1e-10)
    }
}

/// Estimates the largest eigenvalue of `KᵀK` by power iteration from a constant start.
pub fn power_iteration<K: LinearOperator + ?Sized>(
    op: &K,
    max_iterations: usize,
    tolerance: f64,
) -> f64 {
    let n = op.input_dim();
    if n == 0 {
        return 0.0;
    }
    let mut v = Array1::from_elem(n, 1.0 / (n as f64).sqrt());
    // break the symmetry of the constant vector, which is an eigenvector of many blurs
    v[0] *= 1.5;
    let mut estimate = 0.0;
    for _ in 0..max_iterations {
        let w = op.adjoint(op.forward(v.view()).view());
        let norm = w.dot(&w).sqrt();
        if norm == 0.0 {
            return 0.0;
        }
        let previous = estimate;
        estimate = v.dot(&w) / v.dot(&v);
        v = w / norm;
        if (estimate - previous).abs() <= tolerance * estimate.abs() {
            break;
        }
    }
    estimate
}

impl LinearOperator for Array2<f64> {
    fn input_dim(&self) -> usize {
        self.ncols()
    }

    fn output_dim(&self) -> usize {
        self.nrows()
    }

    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.dot(&x)
    }

    fn adjoint(&self, z: ArrayView1<f64>) -> Array1<f64> {
        self.t().dot(&z)
    }
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    out
}

/// Circular 2-D convolution with a fixed kernel, applied through FFTs.
///
/// The kernel is centred at `(kh / 2, kw / 2)`, so odd-sized symmetric kernels do not
/// shift the image.
#[derive(Clone)]
pub struct Convolution2D {
    rows: usize,
    cols: usize,
    kernel: Array2<f64>,
    transfer: Vec<Complex<f64>>,
    row_fft: Arc<dyn Fft<f64>>,
    row_ifft: Arc<dyn Fft<f64>>,
    col_fft: Arc<dyn Fft<f64>>,
    col_ifft: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Convolution2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolution2D")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("kernel", &self.kernel)
            .finish()
    }
}

impl Convolution2D {
    /// Blur of a `rows × cols` image by `kernel`.
    ///
    /// Fails with [`LangevinError::InvalidModelConfiguration`] for empty, non-finite,
    /// zero-sum or larger-than-image kernels.
    pub fn new(rows: usize, cols: usize, kernel: Array2<f64>) -> Result<Self> {
        let (kh, kw) = kernel.dim();
        if rows == 0 || cols == 0 {
            return Err(LangevinError::model("image must have at least one pixel"));
        }
        if kh == 0 || kw == 0 {
            return Err(LangevinError::model("blur kernel is empty"));
        }
        if kh > rows || kw > cols {
            return Err(LangevinError::model(format!(
                "blur kernel {kh}x{kw} does not fit a {rows}x{cols} image"
            )));
        }
        if kernel.iter().any(|v| !v.is_finite()) {
            return Err(LangevinError::model("blur kernel has non-finite entries"));
        }
        if kernel.sum().abs() < 1e-12 {
            return Err(LangevinError::model("blur kernel sums to zero"));
        }

        let mut planner = FftPlanner::<f64>::new();
        let mut op = Self {
            rows,
            cols,
            row_fft: planner.plan_fft_forward(cols),
            row_ifft: planner.plan_fft_inverse(cols),
            col_fft: planner.plan_fft_forward(rows),
            col_ifft: planner.plan_fft_inverse(rows),
            transfer: Vec::new(),
            kernel,
        };

        let mut psf = vec![Complex::new(0.0, 0.0); rows * cols];
        let (ci, cj) = (kh / 2, kw / 2);
        for ((i, j), &k) in op.kernel.indexed_iter() {
            let r = (i + rows - ci) % rows;
            let c = (j + cols - cj) % cols;
            psf[r * cols + c] += Complex::new(k, 0.0);
        }
        op.transform(&mut psf, false);
        op.transfer = psf;
        Ok(op)
    }

    /// `size × size` box blur with weights `1 / size²`.
    pub fn uniform(rows: usize, cols: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(LangevinError::model("blur kernel is empty"));
        }
        let weight = 1.0 / (size * size) as f64;
        Self::new(rows, cols, Array2::from_elem((size, size), weight))
    }

    /// Normalized `size × size` Gaussian blur with standard deviation `width` pixels.
    pub fn gaussian(rows: usize, cols: usize, size: usize, width: f64) -> Result<Self> {
        ensure_positive_parameter("blur width", width)?;
        if size == 0 {
            return Err(LangevinError::model("blur kernel is empty"));
        }
        let c = (size as f64 - 1.0) / 2.0;
        let mut kernel = Array2::from_shape_fn((size, size), |(i, j)| {
            let r2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2);
            (-r2 / (2.0 * width * width)).exp()
        });
        let total = kernel.sum();
        kernel /= total;
        Self::new(rows, cols, kernel)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn kernel(&self) -> &Array2<f64> {
        &self.kernel
    }

    /// In-place unnormalized 2-D DFT of a row-major buffer.
    fn transform(&self, buffer: &mut [Complex<f64>], inverse: bool) {
        let (along_rows, along_cols) = if inverse {
            (&self.row_ifft, &self.col_ifft)
        } else {
            (&self.row_fft, &self.col_fft)
        };
        along_rows.process(buffer);
        let mut transposed = transpose(buffer, self.rows, self.cols);
        along_cols.process(&mut transposed);
        buffer.copy_from_slice(&transpose(&transposed, self.cols, self.rows));
    }

    /// `ifft(f(fft(x), Ĥ))`, real part.
    fn filter(
        &self,
        x: ArrayView1<f64>,
        f: impl Fn(Complex<f64>, Complex<f64>) -> Complex<f64>,
    ) -> Array1<f64> {
        let mut buffer: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.transform(&mut buffer, false);
        for (b, &h) in buffer.iter_mut().zip(&self.transfer) {
            *b = f(*b, h);
        }
        self.transform(&mut buffer, true);
        let scale = 1.0 / (self.rows * self.cols) as f64;
        Array1::from_iter(buffer.iter().map(|c| c.re * scale))
    }

    /// Solves `(I + c·AᵀA) u = rhs` exactly in the Fourier domain.
    pub fn regularized_inverse(&self, rhs: ArrayView1<f64>, c: f64) -> Array1<f64> {
        self.filter(rhs, |b, h| b / (1.0 + c * h.norm_sqr()))
    }
}

impl LinearOperator for Convolution2D {
    fn input_dim(&self) -> usize {
        self.rows * self.cols
    }

    fn output_dim(&self) -> usize {
        self.rows * self.cols
    }

    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.filter(x, |b, h| b * h)
    }

    fn adjoint(&self, z: ArrayView1<f64>) -> Array1<f64> {
        self.filter(z, |b, h| b * h.conj())
    }

    /// Exact: the largest squared modulus of the transfer function.
    fn norm_squared(&self) -> f64 {
        self.transfer
            .iter()
            .fold(0.0_f64, |m, h| m.max(h.norm_sqr()))
    }
}

/// Forward-difference discrete gradient, output stacked as `[∂y; ∂x]`.
///
/// The difference across the last row (for `∂y`) and last column (for `∂x`) is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gradient2D {
    rows: usize,
    cols: usize,
}

impl Gradient2D {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(LangevinError::model("image must have at least one pixel"));
        }
        Ok(Self { rows, cols })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl LinearOperator for Gradient2D {
    fn input_dim(&self) -> usize {
        self.rows * self.cols
    }

    fn output_dim(&self) -> usize {
        2 * self.rows * self.cols
    }

    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let (rows, cols) = (self.rows, self.cols);
        let n = rows * cols;
        let mut out = Array1::zeros(2 * n);
        for i in 0..rows {
            for j in 0..cols {
                let p = i * cols + j;
                if i + 1 < rows {
                    out[p] = x[p + cols] - x[p];
                }
                if j + 1 < cols {
                    out[n + p] = x[p + 1] - x[p];
                }
            }
        }
        out
    }

    fn adjoint(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let (rows, cols) = (self.rows, self.cols);
        let n = rows * cols;
        let mut out = Array1::zeros(n);
        for i in 0..rows {
            for j in 0..cols {
                let p = i * cols + j;
                if i + 1 < rows {
                    out[p + cols] += z[p];
                    out[p] -= z[p];
                }
                if j + 1 < cols {
                    out[p + 1] += z[n + p];
                    out[p] -= z[n + p];
                }
            }
        }
        out
    }

    /// Upper bound `8`.
    fn norm_squared(&self) -> f64 {
        8.0
    }
}

/// `weight · TV(x)` with TV the isotropic (ℓ₂,₁) or anisotropic (ℓ₁) norm of the
/// discrete gradient.
///
/// No closed-form prox exists; [`Proximal::prox_nonsmooth`] runs projected gradient
/// on the dual problem until the dual iterates move less than the configured tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalVariation {
    gradient: Gradient2D,
    norm: MixedNorm,
    solver: SubSolverConfig,
}

impl TotalVariation {
    pub fn new(
        rows: usize,
        cols: usize,
        weight: f64,
        isotropic: bool,
        solver: SubSolverConfig,
    ) -> Result<Self> {
        solver.validate()?;
        Ok(Self {
            gradient: Gradient2D::new(rows, cols)?,
            norm: MixedNorm::new(weight, 2, isotropic)?,
            solver,
        })
    }

    pub fn gradient(&self) -> &Gradient2D {
        &self.gradient
    }

    /// The norm applied to the gradient field.
    pub fn norm(&self) -> &MixedNorm {
        &self.norm
    }

    pub fn weight(&self) -> f64 {
        self.norm.weight()
    }
}

impl Proximal for TotalVariation {
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64 {
        let kx = self.gradient.forward(x);
        self.norm.nonsmooth_value(kx.view())
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64> {
        if step == 0.0 {
            return x.to_owned();
        }
        let dual_step = 1.0 / (step * self.gradient.norm_squared());
        let mut p = Array1::<f64>::zeros(self.gradient.output_dim());
        let mut iterations = 0;
        for _ in 0..self.solver.max_iterations {
            iterations += 1;
            let primal = &x - &(self.gradient.adjoint(p.view()) * step);
            let ascent = &p + &(self.gradient.forward(primal.view()) * dual_step);
            let next = self.norm.project_dual_ball(ascent.view());
            let change = (&next - &p).fold(0.0_f64, |m, v| m.max(v.abs()));
            p = next;
            if change <= self.solver.tolerance {
                break;
            }
        }
        if iterations == self.solver.max_iterations {
            log::trace!("TV prox stopped at its iteration cap of {iterations}");
        }
        &x - &(self.gradient.adjoint(p.view()) * step)
    }

    fn nonsmooth_dim(&self) -> Option<usize> {
        Some(self.gradient.input_dim())
    }
}
