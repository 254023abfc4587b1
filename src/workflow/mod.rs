pub mod conversion;
pub mod definition;
pub mod topology;

pub use definition::*;
pub use topology::*;
