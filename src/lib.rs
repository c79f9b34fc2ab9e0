pub mod bignum;
pub mod config;
pub mod crypto_serde;
pub mod errors;
pub mod ledger;
pub mod protocol;
pub mod recipes;
pub mod session;
pub mod signing;
pub mod sra;
pub mod tokio_tools;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use errors::Error;
pub use types::{ClientId, Roster};
