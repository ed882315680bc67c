pub mod lu;

pub use lu::*;
