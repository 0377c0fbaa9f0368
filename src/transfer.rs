use crate::{
    common::*,
    config::{self, Config},
    model::{GeneratorInit, MakeupParams, ReferenceInput},
};

pub fn start(config: Config) -> Result<()> {
    let Config {
        model:
            config::Model {
                device,
                seed,
                checkpoint,
            },
        transfer: config::Transfer {
            input,
            output,
            mode,
        },
    } = config;

    if let Some(seed) = seed {
        tch::manual_seed(seed);
    }

    // initialize model
    let mut vs = nn::VarStore::new(device);
    let generator = GeneratorInit::default().build(vs.root())?;

    match &checkpoint {
        Some(path) => {
            vs.load(path)
                .with_context(|| format!("unable to load checkpoint '{}'", path.display()))?;
            info!("loaded checkpoint '{}'", path.display());
        }
        None => {
            warn!("no checkpoint is given, using initialized parameters");
        }
    }
    vs.freeze();

    let mut tensors = load_tensors(&input, device)?;
    let content = take_tensor(&mut tensors, "content", &input)?;
    info!("content image {:?} from '{}'", content.size(), input.display());

    tch::no_grad(|| -> Result<()> {
        match mode {
            config::Mode::Full => {
                let reference = ReferenceTensors::take(&mut tensors, &input)?;
                let image = generator.transfer(&content, reference.as_input())?;
                save_tensors(&output, &[("image", &image)])?;
            }
            config::Mode::Extract => {
                let reference = ReferenceTensors::take(&mut tensors, &input)?;
                let MakeupParams { gamma, beta } =
                    generator.extract_params(&content, reference.as_input())?;
                save_tensors(&output, &[("gamma", &gamma), ("beta", &beta)])?;
            }
            config::Mode::Apply { params, mix } => {
                let primary = load_params(&params, device)?;
                let params = match mix {
                    Some(config::Mix {
                        params: other,
                        weight,
                    }) => {
                        let secondary = load_params(&other, device)?;
                        info!(
                            "blend '{}' and '{}' with weight {}",
                            params.display(),
                            other.display(),
                            weight
                        );
                        MakeupParams::interpolate(&primary, &secondary, weight)?
                    }
                    None => primary,
                };
                let image = generator.apply_params(&content, &params)?;
                save_tensors(&output, &[("image", &image)])?;
            }
        }
        Ok(())
    })?;

    info!("saved result to '{}'", output.display());
    Ok(())
}

struct ReferenceTensors {
    style: Tensor,
    mask_c: Tensor,
    mask_s: Tensor,
    diff_c: Tensor,
    diff_s: Tensor,
}

impl ReferenceTensors {
    fn take(tensors: &mut HashMap<String, Tensor>, path: &Path) -> Result<Self> {
        Ok(Self {
            style: take_tensor(tensors, "style", path)?,
            mask_c: take_tensor(tensors, "mask_c", path)?,
            mask_s: take_tensor(tensors, "mask_s", path)?,
            diff_c: take_tensor(tensors, "diff_c", path)?,
            diff_s: take_tensor(tensors, "diff_s", path)?,
        })
    }

    fn as_input(&self) -> ReferenceInput<'_> {
        ReferenceInput {
            style: &self.style,
            mask_c: &self.mask_c,
            mask_s: &self.mask_s,
            diff_c: &self.diff_c,
            diff_s: &self.diff_s,
        }
    }
}

fn is_npz(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "npz")
}

/// Reads named tensors from an `.npz` archive or a tch `.ot` file.
pub fn load_tensors(path: impl AsRef<Path>, device: Device) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    let named = if is_npz(path) {
        Tensor::read_npz(path)
    } else {
        Tensor::load_multi(path)
    }
    .with_context(|| format!("unable to read tensors from '{}'", path.display()))?;

    let tensors = named
        .into_iter()
        .map(|(name, tensor)| (name, tensor.to_kind(Kind::Float).to_device(device)))
        .collect();
    Ok(tensors)
}

pub fn save_tensors(path: impl AsRef<Path>, tensors: &[(&str, &Tensor)]) -> Result<()> {
    let path = path.as_ref();
    if is_npz(path) {
        Tensor::write_npz(tensors, path)
    } else {
        Tensor::save_multi(tensors, path)
    }
    .with_context(|| format!("unable to write tensors to '{}'", path.display()))?;
    Ok(())
}

pub fn load_params(path: impl AsRef<Path>, device: Device) -> Result<MakeupParams> {
    let path = path.as_ref();
    let mut tensors = load_tensors(path, device)?;
    let gamma = take_tensor(&mut tensors, "gamma", path)?;
    let beta = take_tensor(&mut tensors, "beta", path)?;
    MakeupParams::new(gamma, beta)
}

fn take_tensor(tensors: &mut HashMap<String, Tensor>, name: &str, path: &Path) -> Result<Tensor> {
    tensors
        .remove(name)
        .ok_or_else(|| format_err!("tensor '{}' is missing in '{}'", name, path.display()))
}
