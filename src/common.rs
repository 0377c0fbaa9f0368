pub use anyhow::{bail, ensure, format_err, Context, Result};
pub use itertools::{izip, Itertools};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fs, iter,
    marker::PhantomData,
    path::{Path, PathBuf},
};
pub use structopt::StructOpt;
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, Module},
    Device, Kind, Tensor,
};
pub use tracing::{debug, info, trace, warn};
