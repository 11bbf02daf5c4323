//! Attribute Protocol ([Vol 3] Part F).

use std::fmt::{Display, Formatter};

pub use {consts::*, handle::*};

pub(crate) use pdu::*;

mod consts;
mod handle;
mod pdu;

/// PDU response result.
pub type RspResult<T> = std::result::Result<T, ErrorRsp>;

/// `ATT_ERROR_RSP` PDU ([Vol 3] Part F, Section 3.4.1.1).
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub struct ErrorRsp {
    pub(crate) req: u8,
    pub(crate) hdl: Option<Handle>,
    pub(crate) err: ErrorCode,
}

impl ErrorRsp {
    /// Creates a new error response.
    #[inline(always)]
    #[must_use]
    pub(crate) const fn new(req: u8, hdl: Option<Handle>, err: ErrorCode) -> Self {
        Self { req, hdl, err }
    }
}

impl Display for ErrorRsp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use num_enum::TryFromPrimitive;
        f.write_str("ATT ")?;
        match Opcode::try_from_primitive(self.req) {
            Ok(op) => write!(f, "{op} "),
            Err(_) => write!(f, "request {:#04X} ", self.req),
        }?;
        if let Some(hdl) = self.hdl {
            write!(f, "for handle {:#06X} ", u16::from(hdl))?;
        }
        write!(f, "failed with {}", self.err)
    }
}
