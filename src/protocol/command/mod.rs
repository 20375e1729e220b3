use crate::error::Result;
use crate::protocol::request::Request;
use bytes::Bytes;

mod executor;
mod parser;

pub use executor::{parse_info, ClientInfo, CommandExecutor};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Basic commands
    Get(Bytes),
    Set { key: Bytes, value: Bytes },
    Del(Vec<Bytes>),
    Exists(Vec<Bytes>),

    // Counters
    Incr(Bytes),
    Decr(Bytes),
    IncrBy { key: Bytes, delta: i64 },
    DecrBy { key: Bytes, delta: i64 },

    // Server commands
    Ping(Option<Bytes>),
    Info(Vec<String>),
    Hello(Option<Bytes>),
    FlushAll,
    ConfigGet(Vec<Bytes>),
    Quit,
}

impl Command {
    /// Parse command from a decoded request
    ///
    /// With `case_sensitive` set, only uppercase command names are recognized.
    #[inline(always)]
    pub fn from_request(request: Request, case_sensitive: bool) -> Result<Self> {
        parser::parse_command(request, case_sensitive)
    }
}
