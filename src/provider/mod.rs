#[cfg(feature = "qianfan")]
pub mod qianfan;
pub mod sse;
pub mod stub;
mod types;

pub use types::*;
