//! Dense layer and MSE loss for the training exercise.
//!
//! Parameters live behind a lock so that a layer can be shared between the
//! pipeline (as a [`StageFn`]) and the optimizer step. All math is plain
//! row-major `f32` loops on the owning device's queue.
//!
//! ```text
//! y  = x · Wᵀ + b          x: [n, in]   W: [out, in]   b: [out]
//! dW += dyᵀ · x
//! db += Σ_rows dy
//! dx  = dy · W
//! ```

use std::sync::RwLock;

use rand::rngs::StdRng;
use rand::Rng;

use tandem_pipeline::StageFn;
use tandem_types::{Block, DeviceId, Result, TandemError};

struct Params {
    weight: Vec<f32>,
    bias: Vec<f32>,
    grad_weight: Vec<f32>,
    grad_bias: Vec<f32>,
}

/// Fully-connected layer `y = x · Wᵀ + b`, resident on one device.
pub struct Linear {
    device: DeviceId,
    in_dim: usize,
    out_dim: usize,
    params: RwLock<Params>,
}

impl Linear {
    /// Weights and bias drawn from U(-k, k) with k = sqrt(1 / in_dim).
    pub fn new(device: DeviceId, in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Self {
        let k = (1.0 / in_dim.max(1) as f32).sqrt();
        let weight = (0..in_dim * out_dim).map(|_| rng.gen_range(-k..=k)).collect();
        let bias = (0..out_dim).map(|_| rng.gen_range(-k..=k)).collect();
        Self::from_parts(device, in_dim, out_dim, weight, bias)
    }

    fn from_parts(
        device: DeviceId,
        in_dim: usize,
        out_dim: usize,
        weight: Vec<f32>,
        bias: Vec<f32>,
    ) -> Self {
        Self {
            device,
            in_dim,
            out_dim,
            params: RwLock::new(Params {
                grad_weight: vec![0.0; weight.len()],
                grad_bias: vec![0.0; bias.len()],
                weight,
                bias,
            }),
        }
    }

    pub fn forward(&self, x: &Block) -> Result<Block> {
        self.check_input(x, self.in_dim, "input")?;
        let p = self.read()?;
        let n = x.rows();
        let mut out = Vec::with_capacity(n * self.out_dim);
        for row in x.data().chunks_exact(self.in_dim) {
            for (o, w) in p.weight.chunks_exact(self.in_dim).enumerate() {
                out.push(dot(row, w) + p.bias[o]);
            }
        }
        Block::new(self.device, vec![n, self.out_dim], out)
    }

    /// Accumulate parameter gradients for `x` and return the input gradient.
    pub fn backward(&self, x: &Block, grad_out: &Block) -> Result<Block> {
        self.check_input(x, self.in_dim, "input")?;
        self.check_input(grad_out, self.out_dim, "gradient")?;
        if x.rows() != grad_out.rows() {
            return Err(TandemError::Shape(format!(
                "{} input rows against {} gradient rows",
                x.rows(),
                grad_out.rows()
            )));
        }

        let mut p = self.write()?;
        let Params {
            weight,
            grad_weight,
            grad_bias,
            ..
        } = &mut *p;

        let mut grad_in = vec![0.0; x.rows() * self.in_dim];
        let rows = x
            .data()
            .chunks_exact(self.in_dim)
            .zip(grad_out.data().chunks_exact(self.out_dim))
            .zip(grad_in.chunks_exact_mut(self.in_dim));
        for ((xr, gr), dxr) in rows {
            for (o, &g) in gr.iter().enumerate() {
                grad_bias[o] += g;
                let span = o * self.in_dim..(o + 1) * self.in_dim;
                axpy(g, xr, &mut grad_weight[span.clone()]);
                axpy(g, &weight[span], dxr);
            }
        }
        Block::new(self.device, vec![x.rows(), self.in_dim], grad_in)
    }

    pub fn zero_grad(&self) -> Result<()> {
        let mut p = self.write()?;
        p.grad_weight.iter_mut().for_each(|g| *g = 0.0);
        p.grad_bias.iter_mut().for_each(|g| *g = 0.0);
        Ok(())
    }

    /// Plain SGD: `θ -= lr · ∇θ`.
    pub fn step(&self, lr: f32) -> Result<()> {
        let mut p = self.write()?;
        let Params {
            weight,
            bias,
            grad_weight,
            grad_bias,
        } = &mut *p;
        axpy(-lr, grad_weight, weight);
        axpy(-lr, grad_bias, bias);
        Ok(())
    }

    fn check_input(&self, x: &Block, width: usize, what: &str) -> Result<()> {
        if x.device() != self.device {
            return Err(TandemError::Device(format!(
                "{what} on {}, layer lives on {}",
                x.device(),
                self.device
            )));
        }
        if x.row_shape() != [width] {
            return Err(TandemError::Shape(format!(
                "{what} row shape {:?}, expected [{width}]",
                x.row_shape()
            )));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Params>> {
        self.params
            .read()
            .map_err(|_| TandemError::Device(format!("parameters on {} poisoned", self.device)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Params>> {
        self.params
            .write()
            .map_err(|_| TandemError::Device(format!("parameters on {} poisoned", self.device)))
    }
}

impl StageFn for Linear {
    fn forward(&self, device: DeviceId, input: &Block) -> Result<Block> {
        if device != self.device {
            return Err(TandemError::Device(format!(
                "layer on {} invoked on {device}",
                self.device
            )));
        }
        Linear::forward(self, input)
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("device", &self.device)
            .field("in_dim", &self.in_dim)
            .field("out_dim", &self.out_dim)
            .finish()
    }
}

// ── Loss ─────────────────────────────────────────────────────────────────────

/// Mean squared error over every element, with its gradient w.r.t. `output`.
pub fn mse_loss(output: &Block, target: &Block) -> Result<(f32, Block)> {
    if output.dims() != target.dims() {
        return Err(TandemError::Shape(format!(
            "output {:?} against target {:?}",
            output.dims(),
            target.dims()
        )));
    }
    if output.device() != target.device() {
        return Err(TandemError::Device(format!(
            "output on {}, target on {}",
            output.device(),
            target.device()
        )));
    }
    let n = output.data().len();
    if n == 0 {
        return Ok((0.0, Block::zeros(output.device(), output.rows(), output.row_shape())));
    }

    let diff: Vec<f32> = output
        .data()
        .iter()
        .zip(target.data())
        .map(|(o, t)| o - t)
        .collect();
    let loss = diff.iter().map(|d| d * d).sum::<f32>() / n as f32;
    let scale = 2.0 / n as f32;
    let grad = diff.into_iter().map(|d| d * scale).collect();
    Ok((loss, Block::new(output.device(), output.dims().to_vec(), grad)?))
}

// ── Kernels ──────────────────────────────────────────────────────────────────

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha · x`
fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const A: DeviceId = DeviceId::Accel(0);

    /// W = [[1, 2], [3, 4], [5, 6]], b = [0.5, -0.5, 0]
    fn fixed() -> Linear {
        Linear::from_parts(
            A,
            2,
            3,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![0.5, -0.5, 0.0],
        )
    }

    #[test]
    fn forward_matches_hand_computation() {
        let x = Block::new(A, vec![2, 2], vec![1.0, 0.0, 1.0, 1.0]).unwrap();
        let y = fixed().forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 3]);
        assert_eq!(y.data(), &[1.5, 2.5, 5.0, 3.5, 6.5, 11.0]);
    }

    #[test]
    fn backward_matches_hand_computation() {
        let layer = fixed();
        let x = Block::new(A, vec![1, 2], vec![2.0, -1.0]).unwrap();
        let dy = Block::new(A, vec![1, 3], vec![1.0, 0.0, -1.0]).unwrap();
        let dx = layer.backward(&x, &dy).unwrap();
        // dx = dy · W = [1 - 5, 2 - 6]
        assert_eq!(dx.data(), &[-4.0, -4.0]);

        let p = layer.read().unwrap();
        assert_eq!(p.grad_bias, vec![1.0, 0.0, -1.0]);
        assert_eq!(p.grad_weight, vec![2.0, -1.0, 0.0, 0.0, -2.0, 1.0]);
    }

    #[test]
    fn step_then_zero_grad() {
        let layer = fixed();
        let x = Block::new(A, vec![1, 2], vec![1.0, 1.0]).unwrap();
        let dy = Block::new(A, vec![1, 3], vec![1.0, 1.0, 1.0]).unwrap();
        layer.backward(&x, &dy).unwrap();
        layer.step(0.5).unwrap();
        {
            let p = layer.read().unwrap();
            assert_eq!(p.weight, vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
            assert_eq!(p.bias, vec![0.0, -1.0, -0.5]);
        }
        layer.zero_grad().unwrap();
        let p = layer.read().unwrap();
        assert!(p.grad_weight.iter().chain(&p.grad_bias).all(|g| *g == 0.0));
    }

    #[test]
    fn init_is_bounded_and_seeded() {
        let mut r1 = StdRng::seed_from_u64(7);
        let mut r2 = StdRng::seed_from_u64(7);
        let a = Linear::new(A, 16, 4, &mut r1);
        let b = Linear::new(A, 16, 4, &mut r2);
        let (pa, pb) = (a.read().unwrap(), b.read().unwrap());
        assert_eq!(pa.weight, pb.weight);
        assert!(pa.weight.iter().all(|w| w.abs() <= 0.25));
    }

    #[test]
    fn rejects_wrong_device_and_width() {
        let layer = fixed();
        let foreign = Block::zeros(DeviceId::Accel(1), 1, &[2]);
        assert!(matches!(layer.forward(&foreign), Err(TandemError::Device(_))));
        let narrow = Block::zeros(A, 1, &[3]);
        assert!(matches!(layer.forward(&narrow), Err(TandemError::Shape(_))));
        assert!(StageFn::forward(&layer, DeviceId::Accel(1), &Block::zeros(A, 1, &[2])).is_err());
    }

    #[test]
    fn mse_value_and_gradient() {
        let out = Block::new(A, vec![2, 1], vec![1.0, 3.0]).unwrap();
        let target = Block::new(A, vec![2, 1], vec![0.0, 1.0]).unwrap();
        let (loss, grad) = mse_loss(&out, &target).unwrap();
        assert!((loss - 2.5).abs() < 1e-6);
        assert_eq!(grad.data(), &[1.0, 2.0]);
    }

    #[test]
    fn mse_rejects_shape_mismatch() {
        let out = Block::zeros(A, 2, &[1]);
        let target = Block::zeros(A, 3, &[1]);
        assert!(mse_loss(&out, &target).is_err());
    }
}
