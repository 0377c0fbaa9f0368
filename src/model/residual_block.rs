use super::instance_norm::{InstanceNorm, InstanceNormConfig};
use crate::common::*;

/// Static normalization setting of a branch.
pub trait NormMode: std::fmt::Debug + Send + 'static {
    const AFFINE: bool;
}

/// Affine instance normalization, used by the makeup extraction branch.
#[derive(Debug, Clone, Copy)]
pub struct Affine;

/// Plain instance normalization, used by the transfer branch.
#[derive(Debug, Clone, Copy)]
pub struct NonAffine;

impl NormMode for Affine {
    const AFFINE: bool = true;
}

impl NormMode for NonAffine {
    const AFFINE: bool = false;
}

pub type StyleResidualBlock = ResidualBlock<Affine>;
pub type ContentResidualBlock = ResidualBlock<NonAffine>;

pub fn norm_config<M: NormMode>() -> InstanceNormConfig {
    InstanceNormConfig {
        affine: M::AFFINE,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct ResidualBlockInit<M: NormMode> {
    pub dim_in: usize,
    pub dim_out: usize,
    _mode: PhantomData<M>,
}

impl<M: NormMode> ResidualBlockInit<M> {
    pub fn new(dim: usize) -> Self {
        Self {
            dim_in: dim,
            dim_out: dim,
            _mode: PhantomData,
        }
    }

    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<ResidualBlock<M>> {
        let path = path.borrow();
        let Self {
            dim_in, dim_out, ..
        } = self;
        ensure!(
            dim_in == dim_out,
            "residual block requires dim_in == dim_out, but get {} and {}",
            dim_in,
            dim_out
        );
        let dim_in = dim_in as i64;
        let dim_out = dim_out as i64;
        let main = path / "main";

        let conv_config = nn::ConvConfig {
            stride: 1,
            padding: 1,
            bias: false,
            ..Default::default()
        };

        let seq = nn::seq()
            .add(nn::conv2d(&main / "0", dim_in, dim_out, 3, conv_config))
            .add(InstanceNorm::new(&main / "1", dim_out, norm_config::<M>()))
            .add_fn(|xs| xs.relu())
            .add(nn::conv2d(&main / "3", dim_out, dim_out, 3, conv_config))
            .add(InstanceNorm::new(&main / "4", dim_out, norm_config::<M>()));

        Ok(ResidualBlock {
            seq,
            _mode: PhantomData,
        })
    }
}

#[derive(Debug)]
pub struct ResidualBlock<M: NormMode> {
    seq: nn::Sequential,
    _mode: PhantomData<M>,
}

impl<M: NormMode> nn::Module for ResidualBlock<M> {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs + self.seq.forward(xs)
    }
}
