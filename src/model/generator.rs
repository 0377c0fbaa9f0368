use super::{
    correspondence::{get_weight, region_mask, SparseCorrespondence},
    get_matrix::{GetMatrix, GetMatrixInit, GetMatrixOutput},
    instance_norm::{InstanceNorm, InstanceNormConfig},
    non_local::NonLocalBlock2D,
    params::MakeupParams,
    residual_block::{ContentResidualBlock, ResidualBlockInit, StyleResidualBlock},
};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub base_channels: usize,
    pub num_down_samples: usize,
    pub num_style_blocks: usize,
    pub num_content_blocks: usize,
    /// Scale applied to appearance features before they meet the diff features.
    pub feature_scale: f64,
    /// Multiplier on similarities before the softmax.
    pub sharpness: f64,
}

impl Default for GeneratorInit {
    fn default() -> Self {
        Self {
            base_channels: 64,
            num_down_samples: 2,
            num_style_blocks: 3,
            num_content_blocks: 6,
            feature_scale: 0.01,
            sharpness: 200.0,
        }
    }
}

impl GeneratorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Generator> {
        let path = path.borrow();
        let Self {
            base_channels,
            num_down_samples,
            num_style_blocks,
            num_content_blocks,
            feature_scale,
            sharpness,
        } = self;
        ensure!(base_channels > 0, "base_channels must be positive");
        ensure!(
            num_style_blocks < num_content_blocks,
            "makeup is injected before content block {}, but there are only {} content blocks",
            num_style_blocks,
            num_content_blocks
        );

        let base_channels = base_channels as i64;
        let bottleneck_channels = base_channels << num_down_samples;

        let in_conv_config = nn::ConvConfig {
            stride: 1,
            padding: 3,
            bias: false,
            ..Default::default()
        };
        let down_conv_config = nn::ConvConfig {
            stride: 2,
            padding: 1,
            bias: false,
            ..Default::default()
        };
        let up_conv_config = nn::ConvTransposeConfig {
            stride: 2,
            padding: 1,
            bias: false,
            ..Default::default()
        };

        // makeup extraction branch
        let pnet_in = {
            let path = path / "pnet_in";
            nn::seq()
                .add(nn::conv2d(&path / "0", 3, base_channels, 7, in_conv_config))
                .add(InstanceNorm::new(
                    &path / "1",
                    base_channels,
                    InstanceNormConfig::affine(),
                ))
                .add_fn(|xs| xs.relu())
        };

        let pnet_down: Vec<_> = (0..num_down_samples)
            .map(|index| {
                let path = path / format!("pnet_down_{}", index + 1);
                let in_c = base_channels << index;
                let out_c = in_c * 2;
                nn::seq()
                    .add(nn::conv2d(&path / "0", in_c, out_c, 4, down_conv_config))
                    .add(InstanceNorm::new(
                        &path / "1",
                        out_c,
                        InstanceNormConfig::affine(),
                    ))
                    .add_fn(|xs| xs.relu())
            })
            .collect();

        let pnet_bottleneck: Vec<StyleResidualBlock> = (0..num_style_blocks)
            .map(|index| {
                ResidualBlockInit::new(bottleneck_channels as usize)
                    .build(path / format!("pnet_bottleneck_{}", index + 1))
            })
            .try_collect()?;

        let simple_spade = GetMatrixInit {
            dim_in: bottleneck_channels as usize,
            dim_out: 1,
        }
        .build(path / "simple_spade");

        // makeup application branch
        let tnet_in = nn::seq()
            .add(nn::conv2d(
                path / "tnet_in_conv",
                3,
                base_channels,
                7,
                in_conv_config,
            ))
            .add(InstanceNorm::new(
                path / "tnet_in_spade",
                base_channels,
                InstanceNormConfig::default(),
            ))
            .add_fn(|xs| xs.relu());

        let tnet_down: Vec<_> = (0..num_down_samples)
            .map(|index| {
                let in_c = base_channels << index;
                let out_c = in_c * 2;
                nn::seq()
                    .add(nn::conv2d(
                        path / format!("tnet_down_conv_{}", index + 1),
                        in_c,
                        out_c,
                        4,
                        down_conv_config,
                    ))
                    .add(InstanceNorm::new(
                        path / format!("tnet_down_spade_{}", index + 1),
                        out_c,
                        InstanceNormConfig::default(),
                    ))
                    .add_fn(|xs| xs.relu())
            })
            .collect();

        let tnet_bottleneck: Vec<ContentResidualBlock> = (0..num_content_blocks)
            .map(|index| {
                ResidualBlockInit::new(bottleneck_channels as usize)
                    .build(path / format!("tnet_bottleneck_{}", index + 1))
            })
            .try_collect()?;

        let tnet_up: Vec<_> = (0..num_down_samples)
            .map(|index| {
                let in_c = bottleneck_channels >> index;
                let out_c = in_c / 2;
                nn::seq()
                    .add(nn::conv_transpose2d(
                        path / format!("tnet_up_conv_{}", index + 1),
                        in_c,
                        out_c,
                        4,
                        up_conv_config,
                    ))
                    .add(InstanceNorm::new(
                        path / format!("tnet_up_spade_{}", index + 1),
                        out_c,
                        InstanceNormConfig::default(),
                    ))
                    .add_fn(|xs| xs.relu())
            })
            .collect();

        let tnet_out = nn::seq()
            .add(nn::conv2d(
                path / "tnet_out" / "0",
                base_channels,
                3,
                7,
                in_conv_config,
            ))
            .add_fn(|xs| xs.tanh());

        Ok(Generator {
            pnet_in,
            pnet_down,
            pnet_bottleneck,
            simple_spade,
            atten_bottleneck_g: NonLocalBlock2D,
            atten_bottleneck_b: NonLocalBlock2D,
            tnet_in,
            tnet_down,
            tnet_bottleneck,
            tnet_up,
            tnet_out,
            feature_scale,
            sharpness,
        })
    }
}

/// Reference face and the preprocessed tensors that describe it.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceInput<'a> {
    /// Style image `[1, 3, H, W]`.
    pub style: &'a Tensor,
    /// Content region masks `[R, 1, H, W]`, one region per slot.
    pub mask_c: &'a Tensor,
    /// Style region masks `[R, 1, H, W]`.
    pub mask_s: &'a Tensor,
    /// Content diff features `[R, D, h, w]` at bottleneck resolution.
    pub diff_c: &'a Tensor,
    /// Style diff features `[R, D, h, w]`.
    pub diff_s: &'a Tensor,
}

/// Where the makeup matrices come from.
#[derive(Debug, Clone, Copy)]
pub enum MakeupSource<'a> {
    /// Compute them from a reference face.
    Reference(ReferenceInput<'a>),
    /// Reuse cached matrices and skip the extraction branch.
    Params(&'a MakeupParams),
}

#[derive(Debug)]
pub enum GeneratorOutput {
    Image(Tensor),
    Params(MakeupParams),
}

impl GeneratorOutput {
    pub fn into_image(self) -> Result<Tensor> {
        match self {
            Self::Image(image) => Ok(image),
            Self::Params(_) => bail!("expect an image, but get makeup matrices"),
        }
    }

    pub fn into_params(self) -> Result<MakeupParams> {
        match self {
            Self::Params(params) => Ok(params),
            Self::Image(_) => bail!("expect makeup matrices, but get an image"),
        }
    }
}

#[derive(Debug)]
pub struct Generator {
    pnet_in: nn::Sequential,
    pnet_down: Vec<nn::Sequential>,
    pnet_bottleneck: Vec<StyleResidualBlock>,
    simple_spade: GetMatrix,
    atten_bottleneck_g: NonLocalBlock2D,
    atten_bottleneck_b: NonLocalBlock2D,
    tnet_in: nn::Sequential,
    tnet_down: Vec<nn::Sequential>,
    tnet_bottleneck: Vec<ContentResidualBlock>,
    tnet_up: Vec<nn::Sequential>,
    tnet_out: nn::Sequential,
    feature_scale: f64,
    sharpness: f64,
}

impl Generator {
    /// Runs the transfer pipeline.
    ///
    /// With a [MakeupSource::Reference], makeup matrices are computed at the
    /// bottleneck and `ret` stops the pipeline right there, returning them.
    /// With [MakeupSource::Params] the extraction branch is skipped and `ret`
    /// is ignored.
    pub fn forward_atten(
        &self,
        content: &Tensor,
        source: MakeupSource<'_>,
        ret: bool,
    ) -> Result<GeneratorOutput> {
        let Self {
            ref pnet_in,
            ref pnet_down,
            ref pnet_bottleneck,
            ref tnet_in,
            ref tnet_down,
            ref tnet_bottleneck,
            ref tnet_up,
            ref tnet_out,
            ..
        } = *self;

        let (_, content_c, _, _) = content.size4().with_context(|| {
            format!(
                "expect content shape [N, 3, H, W], but get {:?}",
                content.size()
            )
        })?;
        ensure!(
            content_c == 3,
            "expect a 3-channel content image, but get {} channels",
            content_c
        );
        if let MakeupSource::Reference(reference) = source {
            ensure!(
                reference.style.size() == content.size(),
                "content and style shape mismatch: {:?} vs {:?}",
                content.size(),
                reference.style.size()
            );
        }

        // input
        let mut c = tnet_in.forward(content);
        let mut s = match source {
            MakeupSource::Reference(reference) => Some(pnet_in.forward(reference.style)),
            MakeupSource::Params(_) => None,
        };

        // down-sampling
        for (pnet, tnet) in izip!(pnet_down, tnet_down) {
            s = s.map(|s| pnet.forward(&s));
            c = tnet.forward(&c);
        }

        // bottleneck
        let fusion_index = pnet_bottleneck.len();

        for (index, tnet) in tnet_bottleneck.iter().enumerate() {
            if index == fusion_index {
                c = match source {
                    MakeupSource::Reference(reference) => {
                        let s = s.as_ref().ok_or_else(|| {
                            format_err!("style feature is missing at the bottleneck")
                        })?;
                        let params = self.extract(&c, s, &reference)?;

                        if ret {
                            debug!("return makeup matrices without applying them");
                            return Ok(GeneratorOutput::Params(params));
                        }
                        params.apply(&c)
                    }
                    MakeupSource::Params(params) => params.apply(&c),
                };
            }

            if let (Some(pnet), Some(s)) = (pnet_bottleneck.get(index), s.as_mut()) {
                *s = pnet.forward(s);
            }
            c = tnet.forward(&c);
        }

        // up-sampling
        for tnet in tnet_up {
            c = tnet.forward(&c);
        }

        let output = tnet_out.forward(&c);
        Ok(GeneratorOutput::Image(output))
    }

    fn extract(
        &self,
        fea_c: &Tensor,
        fea_s: &Tensor,
        reference: &ReferenceInput<'_>,
    ) -> Result<MakeupParams> {
        let ReferenceInput {
            mask_c,
            mask_s,
            diff_c,
            diff_s,
            ..
        } = *reference;

        let GetMatrixOutput {
            feature: fea_s,
            gamma,
            beta,
        } = self.simple_spade.forward(fea_s);
        let weight = get_weight(
            mask_c,
            mask_s,
            fea_c,
            &fea_s,
            diff_c,
            diff_s,
            self.feature_scale,
            self.sharpness,
        )?;
        debug!(
            "correspondence {:?} with {} nonzero entries",
            weight.size(),
            weight.nnz()
        );

        self.atten_feature(mask_s, &weight, &gamma, &beta)
    }

    /// Moves style-aligned gamma and beta onto content positions and merges
    /// the region slots into a single batch slot.
    pub fn atten_feature(
        &self,
        mask_s: &Tensor,
        weight: &SparseCorrespondence,
        gamma_s: &Tensor,
        beta_s: &Tensor,
    ) -> Result<MakeupParams> {
        let (_, channels, height, width) = gamma_s.size4().with_context(|| {
            format!(
                "expect gamma shape [1, C, H, W], but get {:?}",
                gamma_s.size()
            )
        })?;
        ensure!(
            beta_s.size() == gamma_s.size(),
            "gamma and beta shape mismatch: {:?} vs {:?}",
            gamma_s.size(),
            beta_s.size()
        );
        let (regions, _, _, _) = mask_s.size4().with_context(|| {
            format!(
                "expect style mask shape [R, 1, H, W], but get {:?}",
                mask_s.size()
            )
        })?;

        let mask_s = region_mask(mask_s, height, width, channels)?;
        let gamma_s = gamma_s.repeat(&[regions, 1, 1, 1]) * &mask_s;
        let beta_s = beta_s.repeat(&[regions, 1, 1, 1]) * &mask_s;

        let gamma = self.atten_bottleneck_g.forward(&gamma_s, weight)?;
        let beta = self.atten_bottleneck_b.forward(&beta_s, weight)?;

        // regions are disjoint, so summing the slots combines them
        let gamma = gamma.sum_dim_intlist(&[0], true, Kind::Float);
        let beta = beta.sum_dim_intlist(&[0], true, Kind::Float);

        MakeupParams::new(gamma, beta)
    }

    pub fn transfer(&self, content: &Tensor, reference: ReferenceInput<'_>) -> Result<Tensor> {
        self.forward_atten(content, MakeupSource::Reference(reference), false)?
            .into_image()
    }

    pub fn extract_params(
        &self,
        content: &Tensor,
        reference: ReferenceInput<'_>,
    ) -> Result<MakeupParams> {
        self.forward_atten(content, MakeupSource::Reference(reference), true)?
            .into_params()
    }

    pub fn apply_params(&self, content: &Tensor, params: &MakeupParams) -> Result<Tensor> {
        self.forward_atten(content, MakeupSource::Params(params), false)?
            .into_image()
    }
}
