pub mod proxy;
pub mod report;

pub use proxy::*;
pub use report::*;
