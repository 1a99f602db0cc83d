use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::listener::{ClientState, Listener, NullListener};
use crate::client::message::{Command, Promise, Request, RequestDetails, Setting};
use crate::client::requests::read_bits::ReadBits;
use crate::client::requests::read_registers::ReadRegisters;
use crate::client::requests::read_write_registers::{ReadWriteMultiple, ReadWriteRegisters};
use crate::client::requests::write_multiple::{MultipleWrite, WriteMultiple};
use crate::client::requests::write_single::SingleWrite;
use crate::decode::DecodeLevel;
use crate::error::{InvalidRequest, RequestError, Shutdown};
use crate::retry::OpenRetry;
use crate::serial::client::SerialChannelTask;
use crate::serial::{SerialMode, SerialSettings};
use crate::tcp::client::TcpChannelTask;
use crate::types::{AddressRange, Indexed, UnitId};

/// Handle used to issue requests and adjust settings on a channel task.
///
/// Dropping every clone of the handle shuts the task down. Pending requests
/// are failed, not silently forgotten: every operation resolves with a
/// `RequestError` when the channel cannot complete it.
#[derive(Clone)]
pub struct Channel {
    tx: mpsc::Sender<Command>,
    state: tokio::sync::watch::Receiver<ClientState>,
}

/// publishes every state change to the handle and to the optional
/// user-provided listener
struct StateFanout {
    watch: tokio::sync::watch::Sender<ClientState>,
    listener: Box<dyn Listener<ClientState>>,
}

impl Listener<ClientState> for StateFanout {
    fn update(&mut self, value: ClientState) {
        self.watch.send(value).ok();
        self.listener.update(value);
    }
}

impl Channel {
    pub(crate) fn spawn_tcp(
        addr: SocketAddr,
        max_queued_requests: usize,
        retry: OpenRetry,
        decode: DecodeLevel,
        listener: Option<Box<dyn Listener<ClientState>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(max_queued_requests);
        let (watch, state) = tokio::sync::watch::channel(ClientState::Disabled);
        let fanout = StateFanout {
            watch,
            listener: listener.unwrap_or_else(NullListener::create),
        };
        let mut task = TcpChannelTask::new(addr, rx.into(), retry, decode, Box::new(fanout));
        tokio::spawn(async move { task.run().await });
        Channel { tx, state }
    }

    pub(crate) fn spawn_serial(
        path: &str,
        settings: SerialSettings,
        mode: SerialMode,
        max_queued_requests: usize,
        retry: OpenRetry,
        decode: DecodeLevel,
        listener: Option<Box<dyn Listener<ClientState>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(max_queued_requests);
        let (watch, state) = tokio::sync::watch::channel(ClientState::Disabled);
        let fanout = StateFanout {
            watch,
            listener: listener.unwrap_or_else(NullListener::create),
        };
        let mut task = SerialChannelTask::new(
            path,
            settings,
            mode,
            rx.into(),
            retry,
            decode,
            Box::new(fanout),
        );
        tokio::spawn(async move { task.run().await });
        Channel { tx, state }
    }

    /// current state of the connection behind this channel
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// true if the channel is currently connected (or the port is open)
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// open the channel: the task connects (or opens the port) and starts
    /// processing requests
    pub async fn enable(&mut self) -> Result<(), Shutdown> {
        self.setting(Setting::Enabled(true)).await
    }

    /// close the channel: the connection is dropped and subsequent requests
    /// fail with `NoConnection` until the channel is enabled again
    pub async fn disable(&mut self) -> Result<(), Shutdown> {
        self.setting(Setting::Enabled(false)).await
    }

    /// number of requests and settings queued but not yet processed
    pub fn pending_requests(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// set the response watchdog timeout (default 1000 ms)
    pub async fn set_response_timeout(&mut self, timeout: Duration) -> Result<(), Shutdown> {
        self.setting(Setting::ResponseTimeout(timeout)).await
    }

    /// set how many *additional* write attempts a timed-out request gets
    /// (default 0)
    pub async fn set_retry_times(&mut self, times: usize) -> Result<(), Shutdown> {
        self.setting(Setting::RetryTimes(times)).await
    }

    /// set the inter-frame silent interval t3.5 (default 60 ms)
    ///
    /// ASCII lines usually need a larger value than the default.
    pub async fn set_frame_interval(&mut self, interval: Duration) -> Result<(), Shutdown> {
        self.setting(Setting::FrameInterval(interval)).await
    }

    /// set the pause after a broadcast request (default 200 ms)
    pub async fn set_turnaround_delay(&mut self, delay: Duration) -> Result<(), Shutdown> {
        self.setting(Setting::TurnaroundDelay(delay)).await
    }

    /// change what gets logged at the application/frame/physical layers
    pub async fn set_decode_level(&mut self, level: DecodeLevel) -> Result<(), Shutdown> {
        self.setting(Setting::DecodeLevel(level)).await
    }

    /// read coils (function code 0x01)
    pub async fn read_coils(
        &mut self,
        id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        reject_broadcast(id)?;
        let range = range.of_read_bits()?;
        let (promise, rx) = Promise::channel();
        self.request(id, RequestDetails::ReadCoils(ReadBits::new(range, promise)))
            .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// read discrete inputs (function code 0x02)
    pub async fn read_discrete_inputs(
        &mut self,
        id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        reject_broadcast(id)?;
        let range = range.of_read_bits()?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::ReadDiscreteInputs(ReadBits::new(range, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// read holding registers (function code 0x03)
    pub async fn read_holding_registers(
        &mut self,
        id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        reject_broadcast(id)?;
        let range = range.of_read_registers()?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::ReadHoldingRegisters(ReadRegisters::new(range, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// read input registers (function code 0x04)
    pub async fn read_input_registers(
        &mut self,
        id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        reject_broadcast(id)?;
        let range = range.of_read_registers()?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::ReadInputRegisters(ReadRegisters::new(range, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// write a single coil (function code 0x05)
    ///
    /// A broadcast write resolves with the echoed value once the frame is on
    /// the wire and the turnaround delay has elapsed.
    pub async fn write_single_coil(
        &mut self,
        id: UnitId,
        value: Indexed<bool>,
    ) -> Result<Indexed<bool>, RequestError> {
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::WriteSingleCoil(SingleWrite::new(value, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// write a single holding register (function code 0x06)
    pub async fn write_single_register(
        &mut self,
        id: UnitId,
        value: Indexed<u16>,
    ) -> Result<Indexed<u16>, RequestError> {
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::WriteSingleRegister(SingleWrite::new(value, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// write multiple coils (function code 0x0F)
    pub async fn write_multiple_coils(
        &mut self,
        id: UnitId,
        request: WriteMultiple<bool>,
    ) -> Result<AddressRange, RequestError> {
        request
            .range
            .limited_count(crate::constants::limits::MAX_WRITE_COILS_COUNT)?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::WriteMultipleCoils(MultipleWrite::new(request, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// write multiple holding registers (function code 0x10)
    pub async fn write_multiple_registers(
        &mut self,
        id: UnitId,
        request: WriteMultiple<u16>,
    ) -> Result<AddressRange, RequestError> {
        request
            .range
            .limited_count(crate::constants::limits::MAX_WRITE_REGISTERS_COUNT)?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::WriteMultipleRegisters(MultipleWrite::new(request, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    /// write then read holding registers in a single transaction
    /// (function code 0x17)
    pub async fn read_write_multiple_registers(
        &mut self,
        id: UnitId,
        request: ReadWriteRegisters,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        reject_broadcast(id)?;
        let (promise, rx) = Promise::channel();
        self.request(
            id,
            RequestDetails::ReadWriteMultipleRegisters(ReadWriteMultiple::new(request, promise)),
        )
        .await?;
        rx.await.map_err(|_| RequestError::Shutdown)?
    }

    async fn request(&mut self, id: UnitId, details: RequestDetails) -> Result<(), RequestError> {
        self.tx
            .send(Command::Request(Request::new(id, details)))
            .await
            .map_err(|_| RequestError::Shutdown)
    }

    async fn setting(&mut self, setting: Setting) -> Result<(), Shutdown> {
        self.tx
            .send(Command::Setting(setting))
            .await
            .map_err(|_| Shutdown)
    }
}

fn reject_broadcast(id: UnitId) -> Result<(), RequestError> {
    if id.is_broadcast() {
        return Err(InvalidRequest::BroadcastRead.into());
    }
    Ok(())
}
