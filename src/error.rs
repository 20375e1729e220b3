use crate::protocol::RespValue;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed RESP framing; the connection is closed after the reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("unknown command '{name}', with args beginning with: {args}")]
    UnknownCommand { name: String, args: String },

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("syntax error")]
    Syntax,

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,

    #[error("command not allowed when used memory > 'maxmemory'.")]
    OutOfMemory,

    #[error("unsupported protocol version")]
    NoProto,

    #[error("unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Convert error to Redis error response
    pub fn to_resp(&self) -> RespValue {
        match self {
            Error::OutOfMemory => RespValue::Error(format!("OOM {}", self)),
            Error::NoProto => RespValue::Error(format!("NOPROTO {}", self)),
            _ => RespValue::Error(format!("ERR {}", self)),
        }
    }

    /// Build an unknown-command error in the format redis-cli expects
    pub fn unknown_command(name: &[u8], args: &[bytes::Bytes]) -> Self {
        let mut quoted = String::new();
        for arg in args.iter().take(8) {
            quoted.push('\'');
            quoted.push_str(&String::from_utf8_lossy(arg));
            quoted.push_str("' ");
        }
        Error::UnknownCommand {
            name: String::from_utf8_lossy(name).into_owned(),
            args: quoted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_error_replies() {
        assert_eq!(
            Error::WrongArity("get".into()).to_resp(),
            RespValue::Error("ERR wrong number of arguments for 'get' command".into())
        );
        assert_eq!(
            Error::OutOfMemory.to_resp(),
            RespValue::Error(
                "OOM command not allowed when used memory > 'maxmemory'.".into()
            )
        );
        assert_eq!(
            Error::NoProto.to_resp(),
            RespValue::Error("NOPROTO unsupported protocol version".into())
        );
        assert_eq!(
            Error::Protocol("invalid bulk length".into()).to_resp(),
            RespValue::Error("ERR Protocol error: invalid bulk length".into())
        );
    }

    #[test]
    fn test_unknown_command_format() {
        let err = Error::unknown_command(b"get", &[Bytes::from_static(b"k")]);
        assert_eq!(
            err.to_resp(),
            RespValue::Error("ERR unknown command 'get', with args beginning with: 'k' ".into())
        );
    }
}
