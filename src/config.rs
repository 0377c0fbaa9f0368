use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: Model,
    pub transfer: Transfer,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// Seeds parameter initialization when no checkpoint is given.
    pub seed: Option<i64>,
    /// VarStore file with parameters named after the reference state dict.
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// `.npz` or `.ot` file of named input tensors.
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mode {
    /// Transfer makeup from the reference in the input file.
    Full,
    /// Save the makeup matrices `gamma` and `beta` instead of an image.
    Extract,
    /// Apply previously extracted matrices, optionally blended with another set.
    Apply { params: PathBuf, mix: Option<Mix> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mix {
    pub params: PathBuf,
    /// Weight of the primary matrices, in `[0, 1]`.
    pub weight: R64,
}
