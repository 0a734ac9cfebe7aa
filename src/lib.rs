pub mod artifact;
pub mod cli;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod run;

pub use error::{CleanError, ErrorKind};
