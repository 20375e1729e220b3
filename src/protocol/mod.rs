//! RESP2 wire format: request framing, command parsing and dispatch, and
//! reply encoding.

pub mod command;
pub mod request;
pub mod resp;

pub use command::{ClientInfo, Command, CommandExecutor};
pub use request::{Request, RequestParser};
pub use resp::{parse_i64, write_resp_value, RespValue};
