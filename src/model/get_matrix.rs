use crate::common::*;

#[derive(Debug, Clone)]
pub struct GetMatrixInit {
    pub dim_in: usize,
    pub dim_out: usize,
}

impl GetMatrixInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> GetMatrix {
        let path = path.borrow();
        let Self { dim_in, dim_out } = self;
        let conv_config = nn::ConvConfig {
            bias: false,
            ..Default::default()
        };

        GetMatrix {
            get_gamma: nn::conv2d(
                path / "get_gamma",
                dim_in as i64,
                dim_out as i64,
                1,
                conv_config,
            ),
            get_beta: nn::conv2d(
                path / "get_beta",
                dim_in as i64,
                dim_out as i64,
                1,
                conv_config,
            ),
        }
    }
}

/// Projects style features into per-pixel makeup matrices.
#[derive(Debug)]
pub struct GetMatrix {
    get_gamma: nn::Conv2D,
    get_beta: nn::Conv2D,
}

#[derive(Debug)]
pub struct GetMatrixOutput {
    pub feature: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

impl GetMatrix {
    pub fn forward(&self, input: &Tensor) -> GetMatrixOutput {
        GetMatrixOutput {
            feature: input.shallow_clone(),
            gamma: self.get_gamma.forward(input),
            beta: self.get_beta.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_matrix_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let module = GetMatrixInit {
            dim_in: 16,
            dim_out: 1,
        }
        .build(&root / "simple_spade");

        let input = Tensor::rand(&[2, 16, 8, 8], FLOAT_CPU);
        let GetMatrixOutput {
            feature,
            gamma,
            beta,
        } = module.forward(&input);

        ensure!(feature.equal(&input));
        ensure!(gamma.size() == vec![2, 1, 8, 8]);
        ensure!(beta.size() == vec![2, 1, 8, 8]);

        // the two projections are independent and bias free
        let variables = vs.variables();
        ensure!(variables.len() == 2);
        ensure!(variables.contains_key("simple_spade.get_gamma.weight"));
        ensure!(variables.contains_key("simple_spade.get_beta.weight"));
        ensure!(!gamma.equal(&beta));

        Ok(())
    }
}
