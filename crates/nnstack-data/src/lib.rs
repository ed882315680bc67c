pub mod dataset;
pub mod dataloader;
pub mod schedule;

pub use dataset::*;
pub use dataloader::*;
pub use schedule::*;
