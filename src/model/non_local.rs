use super::correspondence::SparseCorrespondence;
use crate::common::*;

/// Redistributes a single-channel map along a correspondence matrix.
///
/// Each output position is the weighted sum of all source positions, with
/// weights taken from the matching row of the correspondence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonLocalBlock2D;

impl NonLocalBlock2D {
    pub fn forward(&self, source: &Tensor, weight: &SparseCorrespondence) -> Result<Tensor> {
        let (batch_size, channels, height, width) = source.size4().with_context(|| {
            format!(
                "expect source shape [B, 1, H, W], but get {:?}",
                source.size()
            )
        })?;
        ensure!(
            channels == 1,
            "non-local block expects a single channel source, but get {} channels",
            channels
        );
        let hw = height * width;
        ensure!(
            weight.size() == [batch_size, hw, hw],
            "expect correspondence size {:?}, but get {:?}",
            [batch_size, hw, hw],
            weight.size()
        );

        let g_source = source.view([batch_size, 1, hw]).permute(&[0, 2, 1]);
        let output = weight
            .to_dense()
            .bmm(&g_source)
            .permute(&[0, 2, 1])
            .contiguous()
            .view([batch_size, 1, height, width]);

        Ok(output)
    }
}
