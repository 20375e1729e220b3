use super::Command;
use crate::config::Config;
use crate::error::Error;
use crate::protocol::resp::{parse_i64, RespValue};
use crate::stats::ServerStats;
use crate::store::Store;
use bytes::Bytes;
use std::fmt::Write as _;
use std::net::SocketAddr;

/// INFO sections in output order
const INFO_SECTIONS: [&str; 5] = ["server", "clients", "memory", "stats", "keyspace"];

/// Simple glob pattern matching (* and ? support)
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    // Check remaining pattern characters (should only be *)
    while pattern.get(p) == Some(&b'*') {
        p += 1;
    }

    p == pattern.len()
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2}K", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2}M", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2}G", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Identity of the connection a command arrived on
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: Option<SocketAddr>,
}

/// Executes parsed commands against the keyspace
///
/// The executor owns the [`Store`] and the server counters. The event loop
/// holds the only instance and lends it to each connection in turn.
pub struct CommandExecutor {
    store: Store,
    stats: ServerStats,
    config: Config,
}

impl CommandExecutor {
    /// Create a new command executor with an empty keyspace
    pub fn new(config: &Config) -> Self {
        let store = Store::with_capacity(config.initial_capacity, config.max_memory);
        Self {
            store,
            stats: ServerStats::new(),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ServerStats {
        &mut self.stats
    }

    /// Execute a command and return RESP response
    #[inline]
    pub fn execute(&mut self, cmd: Command, client: &ClientInfo) -> RespValue {
        self.stats.total_commands_processed += 1;

        match cmd {
            Command::Get(key) => match self.store.get(&key) {
                Some(value) => RespValue::BulkString(Some(value)),
                None => RespValue::BulkString(None),
            },

            Command::Set { key, value } => match self.store.set(&key, &value) {
                Ok(()) => RespValue::ok(),
                Err(e) => e.to_resp(),
            },

            Command::Del(keys) => {
                let count = keys.iter().filter(|key| self.store.delete(key)).count();
                RespValue::Integer(count as i64)
            }

            Command::Exists(keys) => {
                let count = keys.iter().filter(|key| self.store.exists(key)).count();
                RespValue::Integer(count as i64)
            }

            Command::Incr(key) => self.incr_by(&key, 1),
            Command::Decr(key) => self.incr_by(&key, -1),
            Command::IncrBy { key, delta } => self.incr_by(&key, delta),
            Command::DecrBy { key, delta } => match delta.checked_neg() {
                Some(delta) => self.incr_by(&key, delta),
                None => Error::Overflow.to_resp(),
            },

            Command::Ping(msg) => match msg {
                Some(m) => RespValue::BulkString(Some(m)),
                None => RespValue::SimpleString(Bytes::from_static(b"PONG")),
            },

            Command::Info(sections) => RespValue::bulk(self.info(&sections)),

            Command::Hello(protover) => self.hello(protover, client),

            Command::FlushAll => {
                self.store.flush();
                RespValue::ok()
            }

            Command::ConfigGet(patterns) => self.config_get(&patterns),

            Command::Quit => RespValue::ok(),
        }
    }

    fn incr_by(&mut self, key: &[u8], delta: i64) -> RespValue {
        match self.store.incr_by(key, delta) {
            Ok(value) => RespValue::Integer(value),
            Err(e) => e.to_resp(),
        }
    }

    fn hello(&self, protover: Option<Bytes>, client: &ClientInfo) -> RespValue {
        if let Some(version) = protover {
            match parse_i64(&version) {
                Some(2) => {}
                Some(_) => return Error::NoProto.to_resp(),
                None => {
                    return RespValue::Error(
                        "ERR Protocol version is not an integer or out of range".to_string(),
                    )
                }
            }
        }

        RespValue::array(vec![
            RespValue::bulk("server"),
            RespValue::bulk("cqdam"),
            RespValue::bulk("version"),
            RespValue::bulk(env!("CARGO_PKG_VERSION")),
            RespValue::bulk("proto"),
            RespValue::Integer(2),
            RespValue::bulk("id"),
            RespValue::Integer(client.id as i64),
            RespValue::bulk("mode"),
            RespValue::bulk("standalone"),
            RespValue::bulk("role"),
            RespValue::bulk("master"),
            RespValue::bulk("modules"),
            RespValue::array(vec![]),
        ])
    }

    fn config_get(&self, patterns: &[Bytes]) -> RespValue {
        let maxmemory = self.config.max_memory.unwrap_or(0).to_string();
        let params: [(&str, String); 8] = [
            ("bind", self.config.bind_addr.clone()),
            ("port", self.config.port.to_string()),
            ("maxclients", self.config.max_clients.to_string()),
            ("maxmemory", maxmemory),
            ("maxmemory-policy", "noeviction".to_string()),
            ("databases", "1".to_string()),
            ("save", String::new()),
            ("appendonly", "no".to_string()),
        ];

        let mut reply = Vec::new();
        for (name, value) in params.iter() {
            let matched = patterns
                .iter()
                .any(|pattern| glob_match(&pattern.to_ascii_lowercase(), name.as_bytes()));
            if matched {
                reply.push(RespValue::bulk(name.to_string()));
                reply.push(RespValue::bulk(value.clone()));
            }
        }
        RespValue::array(reply)
    }

    /// Render the INFO text for the requested sections
    pub fn info(&self, sections: &[String]) -> String {
        let all = sections.is_empty()
            || sections
                .iter()
                .any(|s| s == "all" || s == "everything" || s == "default");

        let mut info = String::new();
        for section in INFO_SECTIONS {
            if !all && !sections.iter().any(|s| s == section) {
                continue;
            }
            if !info.is_empty() {
                info.push_str("\r\n");
            }
            self.write_info_section(&mut info, section);
        }
        info
    }

    fn write_info_section(&self, info: &mut String, section: &str) {
        let stats = &self.stats;
        let store = &self.store;

        // Writing to a String cannot fail
        let _ = match section {
            "server" => write!(
                info,
                "# Server\r\n\
                redis_version:7.2.0\r\n\
                cqdam_version:{}\r\n\
                redis_mode:standalone\r\n\
                arch_bits:{}\r\n\
                multiplexing_api:mio\r\n\
                process_id:{}\r\n\
                tcp_port:{}\r\n\
                uptime_in_seconds:{}\r\n",
                env!("CARGO_PKG_VERSION"),
                usize::BITS,
                std::process::id(),
                self.config.port,
                stats.uptime_secs()
            ),
            "clients" => write!(
                info,
                "# Clients\r\n\
                connected_clients:{}\r\n\
                maxclients:{}\r\n",
                stats.connected_clients, self.config.max_clients
            ),
            "memory" => {
                let maxmemory = store.max_memory().unwrap_or(0);
                write!(
                    info,
                    "# Memory\r\n\
                    used_memory:{}\r\n\
                    used_memory_human:{}\r\n\
                    maxmemory:{}\r\n\
                    maxmemory_human:{}\r\n\
                    maxmemory_policy:noeviction\r\n\
                    keyspace_buckets:{}\r\n\
                    keyspace_load_factor:{:.3}\r\n",
                    store.used_memory(),
                    format_bytes(store.used_memory()),
                    maxmemory,
                    format_bytes(maxmemory),
                    store.table().bucket_count(),
                    store.table().load_factor()
                )
            }
            "stats" => write!(
                info,
                "# Stats\r\n\
                total_connections_received:{}\r\n\
                total_commands_processed:{}\r\n\
                rejected_connections:{}\r\n\
                total_net_input_bytes:{}\r\n\
                total_net_output_bytes:{}\r\n\
                total_read_calls:{}\r\n\
                total_write_calls:{}\r\n\
                total_batches:{}\r\n\
                avg_batch_size:{:.2}\r\n\
                syscalls_per_op:{:.4}\r\n\
                total_error_replies_protocol:{}\r\n\
                keyspace_hits:{}\r\n\
                keyspace_misses:{}\r\n",
                stats.total_connections_received,
                stats.total_commands_processed,
                stats.rejected_connections,
                stats.total_net_input_bytes,
                stats.total_net_output_bytes,
                stats.total_read_calls,
                stats.total_write_calls,
                stats.total_batches,
                stats.avg_batch_size(),
                stats.syscalls_per_op(),
                stats.protocol_errors,
                store.hits(),
                store.misses()
            ),
            "keyspace" => {
                if store.is_empty() {
                    write!(info, "# Keyspace\r\n")
                } else {
                    write!(
                        info,
                        "# Keyspace\r\ndb0:keys={},expires=0,avg_ttl=0\r\n",
                        store.len()
                    )
                }
            }
            _ => Ok(()),
        };
    }
}

/// Parse an INFO reply body into `field -> value` pairs
pub fn parse_info(text: &str) -> std::collections::HashMap<String, String> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.trim_end().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request::Request;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(&Config::default())
    }

    fn run(exec: &mut CommandExecutor, parts: &[&str]) -> RespValue {
        let request = Request::new(
            Bytes::copy_from_slice(parts[0].as_bytes()),
            parts[1..]
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
        );
        match Command::from_request(request, true) {
            Ok(cmd) => exec.execute(cmd, &ClientInfo { id: 7, addr: None }),
            Err(e) => e.to_resp(),
        }
    }

    fn err(msg: &str) -> RespValue {
        RespValue::Error(msg.to_string())
    }

    #[test]
    fn test_set_get_del() {
        let mut exec = executor();
        assert_eq!(run(&mut exec, &["GET", "k"]), RespValue::nil());
        assert_eq!(run(&mut exec, &["SET", "k", "v"]), RespValue::ok());
        assert_eq!(run(&mut exec, &["GET", "k"]), RespValue::bulk("v"));
        assert_eq!(run(&mut exec, &["EXISTS", "k", "k", "x"]), RespValue::Integer(2));
        assert_eq!(run(&mut exec, &["DEL", "k", "x"]), RespValue::Integer(1));
        assert_eq!(run(&mut exec, &["DEL", "k"]), RespValue::Integer(0));
        assert_eq!(run(&mut exec, &["GET", "k"]), RespValue::nil());
        assert_eq!(run(&mut exec, &["EXISTS", "k"]), RespValue::Integer(0));
    }

    #[test]
    fn test_counters() {
        let mut exec = executor();
        assert_eq!(run(&mut exec, &["INCR", "n"]), RespValue::Integer(1));
        assert_eq!(run(&mut exec, &["DECR", "m"]), RespValue::Integer(-1));
        assert_eq!(run(&mut exec, &["INCRBY", "n", "10"]), RespValue::Integer(11));
        assert_eq!(run(&mut exec, &["DECRBY", "n", "20"]), RespValue::Integer(-9));
        assert_eq!(run(&mut exec, &["GET", "n"]), RespValue::bulk("-9"));

        run(&mut exec, &["SET", "s", "hello"]);
        assert_eq!(
            run(&mut exec, &["INCR", "s"]),
            err("ERR value is not an integer or out of range")
        );
        assert_eq!(run(&mut exec, &["GET", "s"]), RespValue::bulk("hello"));

        assert_eq!(
            run(&mut exec, &["DECRBY", "n", "-9223372036854775808"]),
            err("ERR increment or decrement would overflow")
        );
    }

    #[test]
    fn test_argument_errors_keep_state() {
        let mut exec = executor();
        assert_eq!(
            run(&mut exec, &["GET"]),
            err("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            run(&mut exec, &["SET", "k", "v", "NX"]),
            err("ERR syntax error")
        );
        assert_eq!(
            run(&mut exec, &["get", "k"]),
            err("ERR unknown command 'get', with args beginning with: 'k' ")
        );
        assert_eq!(exec.store().len(), 0);
    }

    #[test]
    fn test_ping_and_flushall() {
        let mut exec = executor();
        assert_eq!(
            run(&mut exec, &["PING"]),
            RespValue::SimpleString(Bytes::from_static(b"PONG"))
        );
        assert_eq!(run(&mut exec, &["PING", "hi"]), RespValue::bulk("hi"));

        run(&mut exec, &["SET", "a", "1"]);
        run(&mut exec, &["INCR", "b"]);
        assert_eq!(run(&mut exec, &["FLUSHALL"]), RespValue::ok());
        assert_eq!(run(&mut exec, &["GET", "a"]), RespValue::nil());
        assert_eq!(run(&mut exec, &["GET", "b"]), RespValue::nil());
    }

    #[test]
    fn test_hello() {
        let mut exec = executor();
        let reply = run(&mut exec, &["HELLO", "2"]);
        match reply {
            RespValue::Array(Some(items)) => {
                assert_eq!(items.len(), 14);
                assert_eq!(items[1], RespValue::bulk("cqdam"));
                assert_eq!(items[5], RespValue::Integer(2));
                assert_eq!(items[7], RespValue::Integer(7));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(matches!(run(&mut exec, &["HELLO"]), RespValue::Array(Some(_))));
        assert_eq!(
            run(&mut exec, &["HELLO", "3"]),
            err("NOPROTO unsupported protocol version")
        );
        assert!(run(&mut exec, &["HELLO", "two"]).is_error());
    }

    #[test]
    fn test_info_sections() {
        let mut exec = executor();
        run(&mut exec, &["SET", "a", "1"]);
        run(&mut exec, &["GET", "a"]);
        run(&mut exec, &["GET", "zz"]);

        let text = exec.info(&[]);
        for header in ["# Server", "# Clients", "# Memory", "# Stats", "# Keyspace"] {
            assert!(text.contains(header), "missing {}", header);
        }
        let fields = parse_info(&text);
        assert_eq!(fields["keyspace_hits"], "1");
        assert_eq!(fields["keyspace_misses"], "1");
        assert_eq!(fields["total_commands_processed"], "3");
        assert_eq!(fields["db0"], "keys=1,expires=0,avg_ttl=0");
        assert_eq!(fields["multiplexing_api"], "mio");

        let only_memory = exec.info(&["memory".to_string()]);
        assert!(only_memory.starts_with("# Memory"));
        assert!(!only_memory.contains("# Server"));
        assert_eq!(exec.info(&["nonsense".to_string()]), "");

        match run(&mut exec, &["INFO", "KEYSPACE"]) {
            RespValue::BulkString(Some(body)) => assert!(body.starts_with(b"# Keyspace")),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_config_get() {
        let mut exec = executor();
        assert_eq!(
            run(&mut exec, &["CONFIG", "GET", "save"]),
            RespValue::array(vec![RespValue::bulk("save"), RespValue::bulk("")])
        );
        match run(&mut exec, &["CONFIG", "GET", "MAXMEM*"]) {
            RespValue::Array(Some(items)) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[0], RespValue::bulk("maxmemory"));
                assert_eq!(items[2], RespValue::bulk("maxmemory-policy"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            run(&mut exec, &["CONFIG", "GET", "nothing"]),
            RespValue::array(vec![])
        );
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"max*", b"maxclients"));
        assert!(glob_match(b"p?rt", b"port"));
        assert!(glob_match(b"*memory*", b"maxmemory-policy"));
        assert!(!glob_match(b"max*", b"port"));
        assert!(!glob_match(b"p?rt", b"prt"));
        assert!(glob_match(b"", b""));
        assert!(!glob_match(b"", b"a"));
    }

    #[test]
    fn test_max_memory_reply() {
        let config = Config {
            max_memory: Some(100),
            ..Config::default()
        };
        let mut exec = CommandExecutor::new(&config);
        let big = "x".repeat(200);
        assert_eq!(
            run(&mut exec, &["SET", "k", big.as_str()]),
            err("OOM command not allowed when used memory > 'maxmemory'.")
        );
        assert_eq!(run(&mut exec, &["GET", "k"]), RespValue::nil());
    }
}
