pub mod crd;
pub mod error;
pub mod models;

pub use error::PeerGroupError;
