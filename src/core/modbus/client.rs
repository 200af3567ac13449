use log::trace;

use super::{Address, Error, ReadFunction, Reading, SlaveId, Transport, Value, WriteFunction};

/// The four register primitives the bridge protocol is built from.
///
/// Implemented for every [`Transport`]; function codes are fixed here and
/// nowhere else: 1 reads a coil, 3 a holding register, 4 an input register,
/// 5 writes a coil and 6 writes a register.
#[allow(async_fn_in_trait)]
pub trait Client: Transport {
    async fn read_holding_register(&mut self, slave: SlaveId, addr: Address) -> Result<Value, Error> {
        trace!("fc=3 slave={slave} addr={addr}");
        word(self.read(slave, ReadFunction::HoldingRegister(addr)).await?)
    }

    async fn read_input_register(&mut self, slave: SlaveId, addr: Address) -> Result<Value, Error> {
        trace!("fc=4 slave={slave} addr={addr}");
        word(self.read(slave, ReadFunction::InputRegister(addr)).await?)
    }

    async fn write_register(&mut self, slave: SlaveId, addr: Address, value: Value) -> Result<(), Error> {
        trace!("fc=6 slave={slave} addr={addr} value={value}");
        self.write(slave, WriteFunction::SingleRegister(addr, value)).await
    }

    async fn read_bit(&mut self, slave: SlaveId, addr: Address) -> Result<bool, Error> {
        trace!("fc=1 slave={slave} addr={addr}");
        match self.read(slave, ReadFunction::Coil(addr)).await? {
            Reading::Bit(bit) => Ok(bit),
            Reading::Word(_) => Err(Error::InvalidResponse),
        }
    }

    async fn write_bit(&mut self, slave: SlaveId, addr: Address, value: bool) -> Result<(), Error> {
        trace!("fc=5 slave={slave} addr={addr} value={value}");
        self.write(slave, WriteFunction::SingleCoil(addr, value)).await
    }
}

impl<T> Client for T where T: Transport {}

fn word(reading: Reading) -> Result<Value, Error> {
    match reading {
        Reading::Word(value) => Ok(value),
        Reading::Bit(_) => Err(Error::InvalidResponse),
    }
}
