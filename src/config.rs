use crate::protocol::request::DEFAULT_MAX_BULK_LEN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Largest table pre-size accepted from configuration
pub const MAX_INITIAL_CAPACITY: usize = 1 << 28;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum number of simultaneously connected clients
    pub max_clients: usize,

    /// Size of the scratch buffer used for each `read` call
    pub read_buffer_size: usize,

    /// Initial request buffer capacity (per connection)
    pub connection_buffer_size: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Memory limit for the keyspace; writes past it fail with OOM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<usize>,

    /// Number of keys the table is pre-sized for
    pub initial_capacity: usize,

    /// Largest accepted bulk string in a request
    pub max_bulk_len: usize,

    /// Only accept uppercase command names
    pub case_sensitive_commands: bool,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            max_clients: 10000,
            read_buffer_size: 64 * 1024,       // 64KB
            connection_buffer_size: 16 * 1024, // 16KB
            tcp_nodelay: true,
            max_memory: None,
            initial_capacity: 1024,
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            case_sensitive_commands: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields take their default values.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cqdam_server::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("cqdam.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_clients == 0 {
            anyhow::bail!("max_clients must be > 0");
        }

        if self.read_buffer_size < 512 {
            anyhow::bail!("read_buffer_size must be >= 512");
        }

        if self.connection_buffer_size < 1024 {
            anyhow::bail!("connection_buffer_size must be >= 1024");
        }

        if self.max_bulk_len == 0 {
            anyhow::bail!("max_bulk_len must be > 0");
        }

        if self.initial_capacity > MAX_INITIAL_CAPACITY {
            anyhow::bail!("initial_capacity must be <= {}", MAX_INITIAL_CAPACITY);
        }

        if self.max_memory == Some(0) {
            anyhow::bail!("max_memory must be > 0 when set");
        }

        Ok(())
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Parse a human-readable size such as `100mb`, `1gb`, `512k` or `4096`
pub fn parse_memory_size(input: &str) -> anyhow::Result<usize> {
    let s = input.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        anyhow::bail!("invalid memory size '{}'", input);
    }

    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => anyhow::bail!("unknown memory unit '{}' in '{}'", other, input),
    };

    let value: usize = digits.parse()?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("memory size '{}' is too large", input))
}
