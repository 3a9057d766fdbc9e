//! Host side of the probe: everything the core leaves to its collaborators when it runs on a
//! general-purpose OS instead of the device.

pub mod cli;
pub mod clock;
pub mod logger;
pub mod session;
pub mod settings;
pub mod std_net;

pub use clock::SystemClock;
pub use std_net::StdStack;
