pub mod address;
pub mod commands;
pub mod connection;
pub mod conversion;
pub mod device;
pub mod directory;
pub mod dist;
pub mod error;
pub mod modbus;
pub mod resolve;
pub mod session;
pub mod store;

pub use address::*;
pub use connection::*;
pub use conversion::*;
pub use device::*;
pub use directory::*;
pub use dist::*;
pub use error::*;
pub use modbus::*;
pub use resolve::*;
pub use session::*;
pub use store::*;
