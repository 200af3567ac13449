use crate::core::modbus::{Error, ReadFunction, Reading, SlaveId, WriteFunction};

/// A single-master, request/response link to the bridge.
///
/// Every method takes `&mut self`: one transport can have at most one
/// round-trip in flight, which is what the half-duplex serial line demands.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn read(&mut self, slave: SlaveId, function: ReadFunction) -> Result<Reading, Error>;
    async fn write(&mut self, slave: SlaveId, function: WriteFunction) -> Result<(), Error>;

    /// Releases the underlying link. Further calls fail with [`Error::Closed`].
    async fn close(&mut self) -> Result<(), Error>;
}
