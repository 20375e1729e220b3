use crate::config::Config;
use crate::io::{OutputBuffer, WriteProgress};
use crate::protocol::resp::RespValue;
use crate::protocol::{ClientInfo, Command, CommandExecutor, RequestParser};
use std::io::{self, Write};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Manages a client connection with RESP protocol handling
///
/// Owns the connection's request and reply buffers. Commands are executed
/// as soon as they are framed; replies are queued until the event loop
/// flushes them.
pub struct Connection {
    parser: RequestParser,
    output: OutputBuffer,
    client: ClientInfo,

    // Set after QUIT or a protocol error; the connection closes once
    // queued replies are flushed
    closing: bool,

    // Replies queued since the last flush
    batch: usize,

    /// Registered for WRITABLE after a partial flush
    pub write_interest: bool,

    /// Reads suspended until queued replies fall below the high-water mark
    pub read_paused: bool,

    /// Waiting in the event loop's ready list
    pub ready: bool,

    pub commands_processed: u64,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(id: u64, addr: Option<SocketAddr>, config: &Config) -> Self {
        Self {
            parser: RequestParser::with_limits(config.connection_buffer_size, config.max_bulk_len),
            output: OutputBuffer::with_capacity(config.connection_buffer_size),
            client: ClientInfo { id, addr },
            closing: false,
            batch: 0,
            write_interest: false,
            read_paused: false,
            ready: false,
            commands_processed: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.client.id
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// The peer stopped sending; close once queued replies are written
    pub fn finish_input(&mut self) {
        self.closing = true;
    }

    /// Process incoming data, executing every complete command
    ///
    /// Returns the number of replies queued.
    pub fn process_read(&mut self, data: &[u8], executor: &mut CommandExecutor) -> usize {
        if self.closing {
            return 0;
        }

        let case_sensitive = executor.config().case_sensitive_commands;
        self.parser.feed(data);
        let mut replies = 0;

        loop {
            match self.parser.next_request() {
                Ok(Some(request)) => {
                    self.commands_processed += 1;
                    replies += 1;

                    let response = match Command::from_request(request, case_sensitive) {
                        Ok(Command::Quit) => {
                            self.output.push(&RespValue::ok());
                            self.closing = true;
                            break;
                        }
                        Ok(command) => executor.execute(command, &self.client),
                        Err(e) => e.to_resp(),
                    };
                    self.output.push(&response);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Protocol error from client {}: {}", self.client.id, e);
                    executor.stats_mut().protocol_errors += 1;
                    self.output.push(&e.to_resp());
                    replies += 1;
                    self.parser.reset();
                    self.closing = true;
                    break;
                }
            }
        }

        self.batch += replies;
        replies
    }

    /// Bytes of replies not yet written
    pub fn pending_len(&self) -> usize {
        self.output.pending_len()
    }

    /// Write queued replies until drained or the socket would block
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<WriteProgress> {
        let progress = self.output.write_to(writer)?;
        if progress.drained && self.closing {
            debug!("Client {} drained before close", self.client.id);
        }
        Ok(progress)
    }

    /// Replies queued since the previous call
    pub fn take_batch(&mut self) -> usize {
        std::mem::take(&mut self.batch)
    }
}
