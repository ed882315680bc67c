pub mod scaler;
pub mod split;
pub mod fold;

pub use scaler::*;
pub use split::*;
pub use fold::*;
