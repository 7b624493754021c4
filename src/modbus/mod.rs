//! The read-only Modbus TCP surface: MBAP framing, PDU parse/build,
//! and the connection-serving accept loop.

pub mod mbap;
pub mod pdu;
pub mod server;

pub use mbap::MbapHeader;
pub use pdu::{ReadRequest, ResponsePdu};
pub use server::{bind, serve};
