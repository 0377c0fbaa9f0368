mod correspondence;
mod generator;
mod get_matrix;
mod instance_norm;
mod non_local;
mod params;
mod residual_block;

pub use correspondence::*;
pub use generator::*;
pub use get_matrix::*;
pub use instance_norm::*;
pub use non_local::*;
pub use params::*;
pub use residual_block::*;
