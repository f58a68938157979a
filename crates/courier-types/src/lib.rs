mod config;
mod error;
mod task;
mod wire;

pub use config::*;
pub use error::*;
pub use task::*;
pub use wire::*;
