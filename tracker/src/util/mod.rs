//! Small helpers shared by the binaries and the library.

pub mod logging;
pub mod net;
