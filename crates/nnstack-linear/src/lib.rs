pub mod regression;
pub mod mean;

pub use regression::*;
pub use mean::*;
