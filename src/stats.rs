use std::time::Instant;

/// Counters maintained by the event loop and reported by INFO
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub started_at: Instant,
    pub total_connections_received: u64,
    pub connected_clients: u64,
    pub rejected_connections: u64,
    pub total_commands_processed: u64,
    pub protocol_errors: u64,
    /// `read` calls that returned data
    pub total_read_calls: u64,
    /// `write_vectored` calls that wrote data
    pub total_write_calls: u64,
    /// Flushes that sent at least one reply
    pub total_batches: u64,
    pub total_net_input_bytes: u64,
    pub total_net_output_bytes: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections_received: 0,
            connected_clients: 0,
            rejected_connections: 0,
            total_commands_processed: 0,
            protocol_errors: 0,
            total_read_calls: 0,
            total_write_calls: 0,
            total_batches: 0,
            total_net_input_bytes: 0,
            total_net_output_bytes: 0,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Read plus write syscalls per command processed
    pub fn syscalls_per_op(&self) -> f64 {
        if self.total_commands_processed == 0 {
            return 0.0;
        }
        (self.total_read_calls + self.total_write_calls) as f64
            / self.total_commands_processed as f64
    }

    /// Mean number of commands answered per flush
    pub fn avg_batch_size(&self) -> f64 {
        if self.total_batches == 0 {
            return 0.0;
        }
        self.total_commands_processed as f64 / self.total_batches as f64
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
