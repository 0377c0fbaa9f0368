use crate::common::*;

/// Per-pixel makeup matrices aligned to the content face.
#[derive(Debug)]
pub struct MakeupParams {
    pub gamma: Tensor,
    pub beta: Tensor,
}

impl MakeupParams {
    pub fn new(gamma: Tensor, beta: Tensor) -> Result<Self> {
        ensure!(
            gamma.size() == beta.size(),
            "gamma and beta shape mismatch: {:?} vs {:?}",
            gamma.size(),
            beta.size()
        );
        ensure!(
            gamma.dim() == 4,
            "expect makeup matrices of shape [1, C, H, W], but get {:?}",
            gamma.size()
        );
        Ok(Self { gamma, beta })
    }

    /// Blends two references, `lhs * weight + rhs * (1 - weight)`.
    pub fn interpolate(lhs: &Self, rhs: &Self, weight: R64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&weight.raw()),
            "interpolation weight must be in [0, 1], but get {}",
            weight
        );
        ensure!(
            lhs.gamma.size() == rhs.gamma.size(),
            "cannot interpolate makeup matrices of shape {:?} and {:?}",
            lhs.gamma.size(),
            rhs.gamma.size()
        );
        let weight = weight.raw();

        Ok(Self {
            gamma: &lhs.gamma * weight + &rhs.gamma * (1.0 - weight),
            beta: &lhs.beta * weight + &rhs.beta * (1.0 - weight),
        })
    }

    /// Affine modulation `xs * (1 + gamma) + beta`.
    pub fn apply(&self, xs: &Tensor) -> Tensor {
        xs * (&self.gamma + 1.0) + &self.beta
    }
}
