use super::Command;
use crate::error::{Error, Result};
use crate::protocol::request::Request;
use crate::protocol::resp::parse_i64;
use bytes::Bytes;

/// Parse command from a decoded request
#[inline(always)]
pub fn parse_command(request: Request, case_sensitive: bool) -> Result<Command> {
    let Request { name, args } = request;

    let upper;
    let cmd: &[u8] = if case_sensitive {
        &name
    } else {
        upper = name.to_ascii_uppercase();
        &upper
    };

    match cmd {
        b"GET" => {
            check_arity(&args, 1, 1, "get")?;
            let key = first(args);
            Ok(Command::Get(key))
        }

        b"SET" => {
            if args.len() < 2 {
                return Err(Error::WrongArity("set".into()));
            }
            if args.len() > 2 {
                return Err(Error::Syntax);
            }
            let mut args = args.into_iter();
            match (args.next(), args.next()) {
                (Some(key), Some(value)) => Ok(Command::Set { key, value }),
                _ => Err(Error::WrongArity("set".into())),
            }
        }

        b"DEL" => {
            check_arity(&args, 1, usize::MAX, "del")?;
            Ok(Command::Del(args))
        }

        b"EXISTS" => {
            check_arity(&args, 1, usize::MAX, "exists")?;
            Ok(Command::Exists(args))
        }

        b"INCR" => {
            check_arity(&args, 1, 1, "incr")?;
            Ok(Command::Incr(first(args)))
        }

        b"DECR" => {
            check_arity(&args, 1, 1, "decr")?;
            Ok(Command::Decr(first(args)))
        }

        b"INCRBY" => {
            check_arity(&args, 2, 2, "incrby")?;
            let delta = extract_integer(&args[1])?;
            Ok(Command::IncrBy {
                key: first(args),
                delta,
            })
        }

        b"DECRBY" => {
            check_arity(&args, 2, 2, "decrby")?;
            let delta = extract_integer(&args[1])?;
            Ok(Command::DecrBy {
                key: first(args),
                delta,
            })
        }

        b"PING" => {
            check_arity(&args, 0, 1, "ping")?;
            Ok(Command::Ping(args.into_iter().next()))
        }

        b"INFO" => {
            let sections = args
                .iter()
                .map(|s| String::from_utf8_lossy(s).to_ascii_lowercase())
                .collect();
            Ok(Command::Info(sections))
        }

        b"HELLO" => {
            // HELLO [protover]; AUTH and SETNAME options are not supported
            if args.len() > 1 {
                return Err(Error::Syntax);
            }
            Ok(Command::Hello(args.into_iter().next()))
        }

        b"FLUSHALL" => match args.len() {
            0 => Ok(Command::FlushAll),
            1 if args[0].eq_ignore_ascii_case(b"ASYNC") || args[0].eq_ignore_ascii_case(b"SYNC") => {
                Ok(Command::FlushAll)
            }
            _ => Err(Error::Syntax),
        },

        b"CONFIG" => {
            check_arity(&args, 1, usize::MAX, "config")?;
            if !args[0].eq_ignore_ascii_case(b"GET") {
                return Err(Error::UnknownSubcommand(
                    String::from_utf8_lossy(&args[0]).into_owned(),
                ));
            }
            if args.len() < 2 {
                return Err(Error::WrongArity("config|get".into()));
            }
            Ok(Command::ConfigGet(args.into_iter().skip(1).collect()))
        }

        b"QUIT" => Ok(Command::Quit),

        _ => Err(Error::unknown_command(&name, &args)),
    }
}

#[inline]
fn check_arity(args: &[Bytes], min: usize, max: usize, name: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::WrongArity(name.to_string()));
    }
    Ok(())
}

/// Take the first argument; callers have already checked arity
#[inline]
fn first(args: Vec<Bytes>) -> Bytes {
    args.into_iter().next().unwrap_or_default()
}

/// Extract integer from an argument
#[inline]
fn extract_integer(value: &Bytes) -> Result<i64> {
    parse_i64(value).ok_or(Error::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(parts: &[&'static str]) -> Request {
        Request::new(
            Bytes::from_static(parts[0].as_bytes()),
            parts[1..]
                .iter()
                .map(|p| Bytes::from_static(p.as_bytes()))
                .collect(),
        )
    }

    fn parse(parts: &[&'static str]) -> Result<Command> {
        parse_command(request(parts), true)
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(
            parse(&["GET", "k"]).unwrap(),
            Command::Get(Bytes::from_static(b"k"))
        );
        assert_eq!(
            parse(&["SET", "k", "v"]).unwrap(),
            Command::Set {
                key: Bytes::from_static(b"k"),
                value: Bytes::from_static(b"v"),
            }
        );
        assert_eq!(
            parse(&["DEL", "a", "b"]).unwrap(),
            Command::Del(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
        );
        assert_eq!(
            parse(&["INCRBY", "n", "-5"]).unwrap(),
            Command::IncrBy {
                key: Bytes::from_static(b"n"),
                delta: -5,
            }
        );
        assert_eq!(parse(&["PING"]).unwrap(), Command::Ping(None));
        assert_eq!(parse(&["FLUSHALL", "async"]).unwrap(), Command::FlushAll);
        assert_eq!(
            parse(&["INFO", "Stats", "memory"]).unwrap(),
            Command::Info(vec!["stats".into(), "memory".into()])
        );
    }

    #[test]
    fn test_command_names_are_case_sensitive() {
        let err = parse(&["get", "k"]).unwrap_err();
        assert!(matches!(err, Error::UnknownCommand { ref name, .. } if name == "get"));

        let relaxed = parse_command(request(&["get", "k"]), false).unwrap();
        assert_eq!(relaxed, Command::Get(Bytes::from_static(b"k")));
    }

    #[test]
    fn test_wrong_arity() {
        let cases: [&[&'static str]; 9] = [
            &["GET"],
            &["GET", "a", "b"],
            &["SET", "k"],
            &["DEL"],
            &["EXISTS"],
            &["INCR"],
            &["DECR", "a", "b"],
            &["PING", "a", "b"],
            &["CONFIG"],
        ];
        for parts in cases {
            assert!(
                matches!(parse(parts), Err(Error::WrongArity(_))),
                "{:?}",
                parts
            );
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse(&["SET", "k", "v", "EX", "10"]), Err(Error::Syntax)));
        assert!(matches!(parse(&["FLUSHALL", "NOW"]), Err(Error::Syntax)));
        assert!(matches!(parse(&["HELLO", "3", "AUTH"]), Err(Error::Syntax)));
        assert!(matches!(parse(&["INCRBY", "n", "x"]), Err(Error::NotAnInteger)));
        assert!(matches!(
            parse(&["CONFIG", "SET", "a", "b"]),
            Err(Error::UnknownSubcommand(_))
        ));
    }
}
