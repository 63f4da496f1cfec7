pub mod incident;
pub mod prediction;

pub use incident::*;
pub use prediction::*;
