//! Synchronous GATT server core for Bluetooth LE peripherals.
//!
//! The crate implements the server side of the Attribute Protocol on top of
//! an externally provided L2CAP transport. The transport hands each inbound
//! PDU to [`gatt::Server::l2cap_input`] together with the per-link
//! [`gatt::Connection`] state and ships whatever response lands in its
//! output buffer. Services and characteristics are declared up front with
//! [`gatt::Server::build`]; characteristic values stay in host-application
//! memory and are accessed through [`gatt::Io`] callbacks.

pub mod att;
pub mod gap;
pub mod gatt;

mod util;

pub(crate) use util::*;
