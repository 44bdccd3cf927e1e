pub mod config;
pub use config::SimulationConfig;

#[cfg(test)]
pub mod tests;
#[cfg(test)]
pub use tests::*;

pub mod pcn;
pub use pcn::{Network, PaymentMode, PaymentRequest};

mod errors;
pub use errors::{Error, Result};
