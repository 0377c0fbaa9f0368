use crate::common::*;

#[derive(Debug, Clone)]
pub struct InstanceNormConfig {
    pub cudnn_enabled: bool,
    pub eps: f64,
    pub affine: bool,
}

impl Default for InstanceNormConfig {
    fn default() -> Self {
        Self {
            cudnn_enabled: true,
            eps: 1e-5,
            affine: false,
        }
    }
}

impl InstanceNormConfig {
    pub fn affine() -> Self {
        Self {
            affine: true,
            ..Default::default()
        }
    }
}

/// Instance normalization without running statistics.
///
/// The affine parameters are registered as `weight` and `bias` under the
/// given path, initialized to ones and zeros respectively.
#[derive(Debug)]
pub struct InstanceNorm {
    ws: Option<Tensor>,
    bs: Option<Tensor>,
    cudnn_enabled: bool,
    eps: f64,
}

impl InstanceNorm {
    pub fn new<'a>(path: impl Borrow<nn::Path<'a>>, out_dim: i64, config: InstanceNormConfig) -> Self {
        let path = path.borrow();
        let InstanceNormConfig {
            cudnn_enabled,
            eps,
            affine,
        } = config;

        let (ws, bs) = if affine {
            (
                Some(path.ones("weight", &[out_dim])),
                Some(path.zeros("bias", &[out_dim])),
            )
        } else {
            (None, None)
        };

        Self {
            ws,
            bs,
            cudnn_enabled,
            eps,
        }
    }

    pub fn is_affine(&self) -> bool {
        self.ws.is_some()
    }
}

impl nn::Module for InstanceNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        let Self {
            ref ws,
            ref bs,
            cudnn_enabled,
            eps,
        } = *self;

        Tensor::instance_norm(
            input,
            ws.as_ref(),
            bs.as_ref(),
            None,
            None,
            true,
            0.0,
            eps,
            cudnn_enabled,
        )
    }
}
