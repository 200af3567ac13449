use std::io;
use std::time::Duration;

use enum_primitive::FromPrimitive;
use thiserror::Error;

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Modbus exception codes returned from the bridge.
    pub enum ExceptionCode {
        IllegalFunction         = 0x01,
        IllegalDataAddress      = 0x02,
        IllegalDataValue        = 0x03,
        SlaveOrServerFailure    = 0x04,
        Acknowledge             = 0x05,
        SlaveOrServerBusy       = 0x06,
        NegativeAcknowledge     = 0x07,
        MemoryParity            = 0x08,
        NotDefined              = 0x09,
        GatewayPath             = 0x0a,
        GatewayTarget           = 0x0b
    }
}

impl From<tokio_modbus::ExceptionCode> for ExceptionCode {
    fn from(code: tokio_modbus::ExceptionCode) -> ExceptionCode {
        ExceptionCode::from_u8(u8::from(code)).unwrap_or(ExceptionCode::NotDefined)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    UnexpectedReplySize,
    Custom(String),
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Error {
        Error::InvalidData(reason)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("bridge raised exception {0:?}")]
    Exception(ExceptionCode),
    #[error("serial i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("no reply from the bridge within {0:?}")]
    Timeout(Duration),
    #[error("malformed reply")]
    InvalidResponse,
    #[error("invalid reply data: {0:?}")]
    InvalidData(Reason),
    #[error("transport closed")]
    Closed,
}

impl From<ExceptionCode> for Error {
    fn from(err: ExceptionCode) -> Error {
        Error::Exception(err)
    }
}

impl From<tokio_modbus::Error> for Error {
    fn from(err: tokio_modbus::Error) -> Error {
        match err {
            tokio_modbus::Error::Transport(err) => Error::Io(err),
            // Header, function or echo mismatches between request and reply.
            other => Error::InvalidData(Reason::Custom(other.to_string())),
        }
    }
}
