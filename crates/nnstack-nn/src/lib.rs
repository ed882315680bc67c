pub mod layers;
pub mod sequential;
pub mod loss;

pub use layers::*;
pub use sequential::*;
pub use loss::*;
