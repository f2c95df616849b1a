#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod batch;
pub mod error;
pub mod layout;
pub mod matrix;
pub mod merge;
pub mod status;

pub use error::DensifyError;
