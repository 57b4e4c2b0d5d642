//! Services separating file I/O from the pipeline stages

pub mod io;

pub use io::{ImageIOService, OUTPUT_SUFFIX, SUPPORTED_EXTENSIONS};
