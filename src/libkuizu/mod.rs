pub mod db;
pub mod engine;
pub mod error;
pub mod shitsumon;
pub mod source;
pub mod timer;

pub use error::{Error, Result};
