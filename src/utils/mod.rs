// Utils compartidos

pub mod constants;
pub mod runtime;
pub mod storage;

pub use constants::*;
pub use runtime::{sleep, spawn_local, with_timeout, Elapsed};
pub use storage::*;
