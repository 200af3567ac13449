pub type SlaveId = u8;
pub type Address = u16;
pub type Value = u16;

/// Reads understood by the bridge. Each targets exactly one register or coil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFunction {
    Coil(Address),
    HoldingRegister(Address),
    InputRegister(Address),
}

/// Writes understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFunction {
    SingleCoil(Address, bool),
    SingleRegister(Address, Value),
}

/// The result of a single read: registers carry a word, coils a bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Bit(bool),
    Word(Value),
}

impl ReadFunction {
    pub fn address(&self) -> Address {
        match *self {
            ReadFunction::Coil(a)
            | ReadFunction::HoldingRegister(a)
            | ReadFunction::InputRegister(a) => a,
        }
    }
}

impl WriteFunction {
    pub fn address(&self) -> Address {
        match *self {
            WriteFunction::SingleCoil(a, _) | WriteFunction::SingleRegister(a, _) => a,
        }
    }
}
