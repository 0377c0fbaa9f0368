use crate::common::*;

/// Masked logits are pushed far below any real similarity so that they
/// vanish under softmax without producing NaN in fully masked rows.
const MASKED_LOGIT: f64 = -1e30;

/// Sparse style-to-content correspondence in COO layout.
///
/// Entry `(r, i, j)` is the contribution of style position `j` to content
/// position `i` within region slot `r`. Coordinates absent from `indices`
/// are structurally zero.
#[derive(Debug)]
pub struct SparseCorrespondence {
    indices: Tensor,
    values: Tensor,
    size: [i64; 3],
}

impl SparseCorrespondence {
    pub fn new(indices: Tensor, values: Tensor, size: [i64; 3]) -> Result<Self> {
        let (ndim, nnz) = indices.size2()?;
        ensure!(
            ndim == 3,
            "expect indices shape [3, NNZ], but get {:?}",
            indices.size()
        );
        ensure!(
            indices.kind() == Kind::Int64,
            "indices must be int64, but get {:?}",
            indices.kind()
        );
        ensure!(
            values.size() == vec![nnz],
            "expect values shape [{}], but get {:?}",
            nnz,
            values.size()
        );

        Ok(Self {
            indices,
            values,
            size,
        })
    }

    /// Keeps the values of `dense` at the coordinates where `structure` is nonzero.
    pub fn from_structure(structure: &Tensor, dense: &Tensor) -> Result<Self> {
        let (b, n, m) = dense.size3()?;
        ensure!(
            structure.size() == dense.size(),
            "structure shape {:?} does not match dense shape {:?}",
            structure.size(),
            dense.size()
        );

        let indices = structure.nonzero().transpose(0, 1).contiguous();
        let values = dense.index(&[
            Some(indices.select(0, 0)),
            Some(indices.select(0, 1)),
            Some(indices.select(0, 2)),
        ]);

        Self::new(indices, values, [b, n, m])
    }

    pub fn size(&self) -> [i64; 3] {
        self.size
    }

    pub fn nnz(&self) -> i64 {
        self.values.size()[0]
    }

    /// Scatters the explicit entries into a zero tensor. Gradients flow back
    /// to `values`.
    pub fn to_dense(&self) -> Tensor {
        let Self {
            ref indices,
            ref values,
            size,
        } = *self;

        Tensor::zeros(&size, (values.kind(), values.device())).index_put(
            &[
                Some(indices.select(0, 0)),
                Some(indices.select(0, 1)),
                Some(indices.select(0, 2)),
            ],
            values,
            false,
        )
    }
}

/// Computes the correspondence between masked content and style features.
///
/// `fea_c` and `fea_s` are single-batch bottleneck features `[1, C, H, W]`.
/// `mask_c` and `mask_s` hold one region per batch slot and are resized to
/// the feature resolution. `diff_c` and `diff_s` are `[R, D, H, W]`
/// positional features concatenated after the appearance features, which
/// are scaled by `feature_scale`. Similarities are multiplied by
/// `sharpness` before the row-wise softmax.
///
/// The sparsity pattern comes from the raw similarities, so a row whose
/// similarities are all zero stays empty instead of turning uniform.
#[allow(clippy::too_many_arguments)]
pub fn get_weight(
    mask_c: &Tensor,
    mask_s: &Tensor,
    fea_c: &Tensor,
    fea_s: &Tensor,
    diff_c: &Tensor,
    diff_s: &Tensor,
    feature_scale: f64,
    sharpness: f64,
) -> Result<SparseCorrespondence> {
    let (fb, channels, height, width) = fea_c.size4().with_context(|| {
        format!(
            "expect content feature shape [1, C, H, W], but get {:?}",
            fea_c.size()
        )
    })?;
    ensure!(
        fb == 1,
        "content feature must have a single batch slot, but get {}",
        fb
    );
    ensure!(
        fea_s.size() == fea_c.size(),
        "content and style feature shape mismatch: {:?} vs {:?}",
        fea_c.size(),
        fea_s.size()
    );

    let (regions, _, _, _) = mask_c.size4().with_context(|| {
        format!(
            "expect content mask shape [R, 1, H, W], but get {:?}",
            mask_c.size()
        )
    })?;
    let (regions_s, _, _, _) = mask_s.size4().with_context(|| {
        format!(
            "expect style mask shape [R, 1, H, W], but get {:?}",
            mask_s.size()
        )
    })?;
    ensure!(
        regions == regions_s,
        "content mask has {} regions but style mask has {}",
        regions,
        regions_s
    );

    let (dc_r, dc_d, dc_h, dc_w) = diff_c.size4()?;
    ensure!(
        diff_s.size() == diff_c.size(),
        "content and style diff shape mismatch: {:?} vs {:?}",
        diff_c.size(),
        diff_s.size()
    );
    ensure!(
        dc_r == regions && dc_h == height && dc_w == width,
        "expect diff shape [{}, D, {}, {}], but get {:?}",
        regions,
        height,
        width,
        diff_c.size()
    );

    let hw = height * width;

    let mask_region = |mask: &Tensor, fea: &Tensor| -> Result<Tensor> {
        let mask = region_mask(mask, height, width, channels)?;
        Ok(fea.repeat(&[regions, 1, 1, 1]) * mask)
    };
    let fea_c = mask_region(mask_c, fea_c)?;
    let fea_s = mask_region(mask_s, fea_s)?;

    let theta_input = Tensor::cat(&[&fea_c * feature_scale, diff_c.shallow_clone()], 1);
    let phi_input = Tensor::cat(&[&fea_s * feature_scale, diff_s.shallow_clone()], 1);

    let theta_target = theta_input
        .view([regions, channels + dc_d, hw])
        .permute(&[0, 2, 1]);
    let phi_source = phi_input.view([regions, channels + dc_d, hw]);

    let similarity = theta_target.bmm(&phi_source);
    let absent = similarity.eq(0.0);
    let weight = (&similarity * sharpness)
        .masked_fill(&absent, MASKED_LOGIT)
        .softmax(-1, Kind::Float);

    let correspondence = SparseCorrespondence::from_structure(&similarity, &weight)?;
    trace!(
        "correspondence keeps {} of {} entries",
        correspondence.nnz(),
        regions * hw * hw
    );

    Ok(correspondence)
}

/// Nearest-resizes region masks `[R, 1, h, w]` and broadcasts them over `channels`.
pub fn region_mask(mask: &Tensor, height: i64, width: i64, channels: i64) -> Result<Tensor> {
    let (regions, mask_c, _, _) = mask.size4().with_context(|| {
        format!(
            "expect region mask shape [R, 1, H, W], but get {:?}",
            mask.size()
        )
    })?;
    ensure!(
        mask_c == 1,
        "region mask must have a single channel, but get {} channels",
        mask_c
    );

    let mask = mask
        .upsample_nearest2d(&[height, width], None::<f64>, None::<f64>)
        .expand(&[regions, channels, height, width], false);
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_to_dense_test() -> Result<()> {
        let indices = Tensor::of_slice(&[0i64, 0, 1, 2, 1, 0, 0, 2, 1]).view([3, 3]);
        let values = Tensor::of_slice(&[0.25f32, 0.5, 1.0]);
        let sparse = SparseCorrespondence::new(indices, values, [2, 3, 3])?;

        let dense = sparse.to_dense();
        let expect = Tensor::of_slice(&[
            0.0f32, 0.0, 0.0, //
            0.0, 0.0, 0.5, //
            0.25, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, //
        ])
        .view([2, 3, 3]);
        ensure!(dense.equal(&expect), "densification must be exact");
        ensure!(sparse.nnz() == 3);

        Ok(())
    }

    #[test]
    fn sparse_shape_check_test() {
        let indices = Tensor::zeros(&[2, 4], (Kind::Int64, Device::Cpu));
        let values = Tensor::zeros(&[4], FLOAT_CPU);
        assert!(SparseCorrespondence::new(indices, values, [1, 2, 2]).is_err());

        let indices = Tensor::zeros(&[3, 4], (Kind::Int64, Device::Cpu));
        let values = Tensor::zeros(&[5], FLOAT_CPU);
        assert!(SparseCorrespondence::new(indices, values, [1, 2, 2]).is_err());
    }

    #[test]
    fn get_weight_rows_are_normalized_test() -> Result<()> {
        tch::manual_seed(7);
        let c = 4;
        let h = 6;
        let w = 5;
        let d = 3;

        let fea_c = Tensor::randn(&[1, c, h, w], FLOAT_CPU);
        let fea_s = Tensor::randn(&[1, c, h, w], FLOAT_CPU);
        let mask_c = Tensor::rand(&[3, 1, 2 * h, 2 * w], FLOAT_CPU).gt(0.5).to_kind(Kind::Float);
        let mask_s = Tensor::rand(&[3, 1, 2 * h, 2 * w], FLOAT_CPU).gt(0.5).to_kind(Kind::Float);
        let diff_c = Tensor::randn(&[3, d, h, w], FLOAT_CPU) * 0.1;
        let diff_s = Tensor::randn(&[3, d, h, w], FLOAT_CPU) * 0.1;

        let weight = get_weight(&mask_c, &mask_s, &fea_c, &fea_s, &diff_c, &diff_s, 0.01, 200.0)?;
        ensure!(weight.size() == [3, h * w, h * w]);
        ensure!(weight.nnz() > 0);

        let dense = weight.to_dense();
        let row_sums = dense.sum_dim_intlist(&[2], false, Kind::Float);
        let has_entries = dense.ne(0.0).any_dim(2, false);
        let max_err: f64 = (row_sums.masked_select(&has_entries) - 1.0).abs().max().into();
        approx::assert_abs_diff_eq!(max_err, 0.0, epsilon = 1e-4);

        Ok(())
    }

    #[test]
    fn get_weight_empty_rows_stay_empty_test() -> Result<()> {
        let c = 2;
        let h = 4;
        let w = 4;

        let fea_c = Tensor::rand(&[1, c, h, w], FLOAT_CPU) + 0.5;
        let fea_s = Tensor::rand(&[1, c, h, w], FLOAT_CPU) + 0.5;

        // region 0 covers the whole face, region 1 is empty on the content
        // side, region 2 only covers the top half of the content
        let mask_c = Tensor::ones(&[3, 1, h, w], FLOAT_CPU);
        let _ = mask_c.get(1).zero_();
        let _ = mask_c.get(2).narrow(1, h / 2, h / 2).zero_();
        let mask_s = Tensor::ones(&[3, 1, h, w], FLOAT_CPU);
        let diff = Tensor::zeros(&[3, 1, h, w], FLOAT_CPU);

        let weight = get_weight(&mask_c, &mask_s, &fea_c, &fea_s, &diff, &diff, 0.01, 200.0)?;
        let dense = weight.to_dense();
        let row_nnz = dense.ne(0.0).sum_dim_intlist(&[2], false, Kind::Int64);

        let full: Vec<i64> = Vec::from(&row_nnz.get(0));
        ensure!(full.iter().all(|&n| n == h * w));

        let empty: Vec<i64> = Vec::from(&row_nnz.get(1));
        ensure!(empty.iter().all(|&n| n == 0), "masked rows must not be uniform");

        let half: Vec<i64> = Vec::from(&row_nnz.get(2));
        let (top, bottom) = half.split_at((h / 2 * w) as usize);
        ensure!(top.iter().all(|&n| n == h * w));
        ensure!(bottom.iter().all(|&n| n == 0));

        Ok(())
    }

    #[test]
    fn get_weight_partial_style_mask_test() -> Result<()> {
        let c = 3;
        let h = 4;
        let w = 4;
        let hw = h * w;

        let fea_c = Tensor::rand(&[1, c, h, w], FLOAT_CPU) + 0.5;
        let fea_s = Tensor::rand(&[1, c, h, w], FLOAT_CPU) + 0.5;

        // the whole content face against the left half of the style face
        let mask_c = Tensor::ones(&[3, 1, h, w], FLOAT_CPU);
        let mask_s = Tensor::zeros(&[3, 1, h, w], FLOAT_CPU);
        let _ = mask_s.narrow(3, 0, w / 2).fill_(1.0);
        let diff = Tensor::zeros(&[3, 2, h, w], FLOAT_CPU);

        let weight = get_weight(&mask_c, &mask_s, &fea_c, &fea_s, &diff, &diff, 0.01, 200.0)?;
        ensure!(weight.nnz() == 3 * hw * (hw / 2));

        let dense = weight.to_dense();
        let by_style_pos = dense.view([3, hw, h, w]);

        // masked style positions carry nothing
        let masked = by_style_pos.narrow(3, w / 2, w - w / 2);
        ensure!(bool::from(masked.eq(0.0).all()), "masked style positions must be absent");

        // every row keeps exactly the active style positions
        let active = by_style_pos.narrow(3, 0, w / 2);
        ensure!(bool::from(active.gt(0.0).all()), "active style positions must be kept");

        // and renormalizes over them
        let row_sums = dense.sum_dim_intlist(&[2], false, Kind::Float);
        let max_err: f64 = (row_sums - 1.0).abs().max().into();
        approx::assert_abs_diff_eq!(max_err, 0.0, epsilon = 1e-5);

        Ok(())
    }

    #[test]
    fn region_mask_test() -> Result<()> {
        let mask = Tensor::zeros(&[3, 1, 8, 8], FLOAT_CPU);
        let _ = mask.get(1).fill_(1.0);
        let resized = region_mask(&mask, 4, 4, 5)?;
        ensure!(resized.size() == vec![3, 5, 4, 4]);
        ensure!(bool::from(resized.get(1).eq(1.0).all()));
        ensure!(bool::from(resized.get(0).eq(0.0).all()));

        ensure!(region_mask(&Tensor::ones(&[8, 8], FLOAT_CPU), 4, 4, 5).is_err());
        ensure!(region_mask(&Tensor::ones(&[3, 2, 8, 8], FLOAT_CPU), 4, 4, 5).is_err());
        Ok(())
    }

    #[test]
    fn get_weight_shape_check_test() {
        let fea = Tensor::zeros(&[2, 4, 8, 8], FLOAT_CPU);
        let mask = Tensor::ones(&[3, 1, 8, 8], FLOAT_CPU);
        let diff = Tensor::zeros(&[3, 2, 8, 8], FLOAT_CPU);
        assert!(get_weight(&mask, &mask, &fea, &fea, &diff, &diff, 0.01, 200.0).is_err());

        let fea = Tensor::zeros(&[1, 4, 8, 8], FLOAT_CPU);
        let diff = Tensor::zeros(&[3, 2, 4, 4], FLOAT_CPU);
        assert!(get_weight(&mask, &mask, &fea, &fea, &diff, &diff, 0.01, 200.0).is_err());
    }
}
