pub mod client;
pub mod error;
pub mod function;
pub mod transport;
pub mod transports;

pub use client::*;
pub use error::*;
pub use function::*;
pub use transport::*;
pub use transports::*;
