#[macro_use]
extern crate enum_primitive;

pub mod core;


pub mod prelude {
    pub use crate::core::address::*;
    pub use crate::core::connection::*;
    pub use crate::core::conversion::*;
    pub use crate::core::device::*;
    pub use crate::core::directory::{AliasDirectory, AliasMap, DirectoryError};
    pub use crate::core::modbus::*;
    pub use crate::core::resolve::{BatchResolver, ResolvedChannel, ResolvedSensor};
    pub use crate::core::session::{BusMap, DeviceSession};
    pub use crate::core::store::{FileStore, MemoryStore, SessionConfig, SessionStore, StoreError};

    pub use crate::core::{DacError, DacMaster};
}
