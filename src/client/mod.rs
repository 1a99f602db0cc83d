use std::net::SocketAddr;

use crate::decode::DecodeLevel;
use crate::retry::OpenRetry;
use crate::serial::{SerialMode, SerialSettings};

pub(crate) mod channel;
pub(crate) mod listener;
pub(crate) mod message;
pub(crate) mod requests;
pub(crate) mod task;

pub use channel::Channel;
pub use listener::{ClientState, Listener};
pub use requests::read_write_registers::ReadWriteRegisters;
pub use requests::write_multiple::WriteMultiple;

/// Spawns a channel task onto the runtime that maintains a TCP connection and
/// processes requests from a bounded queue. The task runs until every clone of
/// the returned [`Channel`] is dropped.
///
/// The channel starts disabled; call [`Channel::enable`] to connect.
///
/// * `addr` - socket address of the remote server
/// * `max_queued_requests` - the maximum size of the request queue
/// * `retry` - how connect failures are retried
/// * `decode` - decode log level
/// * `listener` - optional observer of the connection state
pub fn spawn_tcp_client_task(
    addr: SocketAddr,
    max_queued_requests: usize,
    retry: OpenRetry,
    decode: DecodeLevel,
    listener: Option<Box<dyn Listener<ClientState>>>,
) -> Channel {
    Channel::spawn_tcp(addr, max_queued_requests, retry, decode, listener)
}

/// Spawns a channel task onto the runtime that opens a serial port and
/// processes requests from a bounded queue. The task runs until every clone of
/// the returned [`Channel`] is dropped.
///
/// The channel starts disabled; call [`Channel::enable`] to open the port.
///
/// * `path` - path to the serial device, e.g. `/dev/ttyUSB0` on Linux or
///   `COM1` on Windows
/// * `settings` - serial port settings
/// * `mode` - RTU or ASCII framing
/// * `max_queued_requests` - the maximum size of the request queue
/// * `retry` - how open failures are retried
/// * `decode` - decode log level
/// * `listener` - optional observer of the connection state
pub fn spawn_serial_client_task(
    path: &str,
    settings: SerialSettings,
    mode: SerialMode,
    max_queued_requests: usize,
    retry: OpenRetry,
    decode: DecodeLevel,
    listener: Option<Box<dyn Listener<ClientState>>>,
) -> Channel {
    Channel::spawn_serial(
        path,
        settings,
        mode,
        max_queued_requests,
        retry,
        decode,
        listener,
    )
}
