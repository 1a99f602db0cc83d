use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::client::message::{Command, Receiver, Request, Setting};
use crate::common::frame::{FramedReader, FrameWriter, TxId};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{RequestError, Shutdown};

/// ends a run of the session loop against the current physical layer
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum SessionError {
    /// the stream errored, the connection must be re-established
    IoError(std::io::ErrorKind),
    /// the channel was disabled by the user
    Disabled,
    /// the command channel was closed on the sender side
    Shutdown,
}

/// The session state machine.
///
/// Requests pop off the command queue strictly in FIFO order, so a single
/// request is in flight at any time. Each one goes through the same motions:
/// an inter-frame gap, the write, then either a turnaround pause (broadcast)
/// or a timeout-supervised wait for a matching response.
pub(crate) struct ClientLoop {
    rx: Receiver<Command>,
    writer: FrameWriter,
    reader: FramedReader,
    tx_id: TxId,
    decode: DecodeLevel,
    enabled: bool,
    response_timeout: Duration,
    retry_times: usize,
    frame_interval: Duration,
    turnaround_delay: Duration,
}

impl ClientLoop {
    pub(crate) fn new(
        rx: Receiver<Command>,
        writer: FrameWriter,
        reader: FramedReader,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            rx,
            writer,
            reader,
            tx_id: TxId::default(),
            decode,
            enabled: false,
            response_timeout: Duration::from_millis(1000),
            retry_times: 0,
            frame_interval: Duration::from_millis(60),
            turnaround_delay: Duration::from_millis(200),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    /// process settings and discard requests until the channel is enabled
    pub(crate) async fn wait_for_enabled(&mut self) -> Result<(), Shutdown> {
        loop {
            if self.enabled {
                return Ok(());
            }
            match self.rx.recv().await? {
                Command::Setting(setting) => self.change_setting(setting),
                Command::Request(request) => {
                    tracing::warn!("channel not open, discarding request");
                    request.fail(RequestError::NoConnection);
                }
            }
        }
    }

    /// process requests against an open physical layer until an error, a
    /// disable, or a shutdown ends this session
    pub(crate) async fn run(&mut self, io: &mut PhysLayer) -> SessionError {
        loop {
            match self.rx.recv().await {
                Err(Shutdown) => return SessionError::Shutdown,
                Ok(Command::Setting(setting)) => {
                    self.change_setting(setting);
                    if !self.enabled {
                        return SessionError::Disabled;
                    }
                }
                Ok(Command::Request(request)) => {
                    if let Some(err) = self.run_one_request(io, request).await {
                        return err;
                    }
                }
            }
        }
    }

    async fn run_one_request(
        &mut self,
        io: &mut PhysLayer,
        request: Request,
    ) -> Option<SessionError> {
        let destination = request.destination();
        self.execute_request(io, request)
            .instrument(tracing::info_span!("Transaction", dest = %destination))
            .await
    }

    async fn execute_request(
        &mut self,
        io: &mut PhysLayer,
        request: Request,
    ) -> Option<SessionError> {
        let destination = request.destination();
        let function = request.details.function();
        let header = self.writer.next_header(destination, &mut self.tx_id);
        let mut attempts_left = self.retry_times;

        // leftover bytes from a previous transaction can never belong to
        // this response
        self.reader.reset();

        loop {
            // successive frames must be separated on the wire (t3.5)
            tokio::time::sleep(self.frame_interval).await;

            let bytes = match self
                .writer
                .format(header, function, &request.details, self.decode)
            {
                Ok(x) => x,
                Err(err) => {
                    request.fail(err);
                    return None;
                }
            };

            if self.decode.app.enabled() {
                tracing::info!("PDU TX - {} {}", function, destination);
            }

            if let Err(err) = io.write(bytes, self.decode.physical).await {
                let kind = err.kind();
                tracing::warn!("error writing request: {}", err);
                request.fail(err.into());
                return Some(SessionError::IoError(kind));
            }

            if destination.is_broadcast() {
                // every server on the line processes the request, nobody
                // responds. The turnaround pause gives them time to do so.
                tokio::time::sleep(self.turnaround_delay).await;
                request.details.complete_broadcast();
                return None;
            }

            let deadline = Instant::now() + self.response_timeout;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if attempts_left > 0 {
                            attempts_left -= 1;
                            tracing::warn!(
                                "response timeout, retrying ({} attempt(s) remaining)",
                                attempts_left
                            );
                            self.reader.reset();
                            break; // rewrite the request
                        }
                        tracing::warn!("response timeout");
                        request.fail(RequestError::ResponseTimeout);
                        return None;
                    }
                    result = self.reader.next_frame(io, self.decode) => match result {
                        Ok(frame) => {
                            if frame.header.tx_id != header.tx_id {
                                tracing::warn!(
                                    "received tx id {:?} while expecting {:?}, discarding frame",
                                    frame.header.tx_id,
                                    header.tx_id
                                );
                                continue;
                            }

                            let source = frame.header.destination.into_unit_id();
                            if source != request.id {
                                tracing::warn!(
                                    "received frame from unexpected server address {}, discarding frame",
                                    source
                                );
                                continue;
                            }

                            request.handle_response(frame.payload(), self.decode.app);
                            return None;
                        }
                        Err(RequestError::Io(kind)) => {
                            tracing::warn!("error reading response: {}", kind);
                            request.fail(RequestError::Io(kind));
                            return Some(SessionError::IoError(kind));
                        }
                        Err(err) => {
                            // the bytes arrived but were malformed. Complete the
                            // request now without consuming the retry budget: a
                            // retry would read the same corruption from the same
                            // sender.
                            tracing::warn!("error parsing response: {}", err);
                            self.reader.reset();
                            request.fail(err);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// fail every request that arrives during the reconnect delay
    pub(crate) async fn fail_requests_for(&mut self, duration: Duration) -> Result<(), Shutdown> {
        let deadline = Instant::now() + duration;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(());
                }
                command = self.rx.recv() => match command {
                    Err(Shutdown) => return Err(Shutdown),
                    Ok(Command::Setting(setting)) => {
                        self.change_setting(setting);
                        if !self.enabled {
                            return Ok(());
                        }
                    }
                    Ok(Command::Request(request)) => {
                        request.fail(RequestError::NoConnection);
                    }
                }
            }
        }
    }

    fn change_setting(&mut self, setting: Setting) {
        match setting {
            Setting::DecodeLevel(level) => {
                tracing::info!("decode level changed: {:?}", level);
                self.decode = level;
            }
            Setting::ResponseTimeout(x) => {
                tracing::info!("response timeout changed: {} ms", x.as_millis());
                self.response_timeout = x;
            }
            Setting::RetryTimes(x) => {
                tracing::info!("retry times changed: {}", x);
                self.retry_times = x;
            }
            Setting::FrameInterval(x) => {
                tracing::info!("frame interval changed: {} ms", x.as_millis());
                self.frame_interval = x;
            }
            Setting::TurnaroundDelay(x) => {
                tracing::info!("turnaround delay changed: {} ms", x.as_millis());
                self.turnaround_delay = x;
            }
            Setting::Enabled(enabled) => {
                tracing::info!("channel {}", if enabled { "enabled" } else { "disabled" });
                self.enabled = enabled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::client::message::{Promise, RequestDetails};
    use crate::client::requests::read_bits::ReadBits;
    use crate::client::requests::write_single::SingleWrite;
    use crate::error::FrameParseError;
    use crate::exception::ExceptionCode;
    use crate::mock::Event;
    use crate::types::{AddressRange, Indexed, UnitId};

    // read coils, start == 10, qty == 3, addressed to unit 0x01
    const READ_COILS_REQUEST: &[u8] = &[0x01, 0x01, 0x00, 0x0A, 0x00, 0x03, 0x5C, 0x09];
    // coils 10..13 are [ON, OFF, ON]
    const READ_COILS_RESPONSE: &[u8] = &[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B];

    struct ClientFixture {
        client: ClientLoop,
        io: PhysLayer,
        io_handle: crate::mock::Handle,
    }

    impl ClientFixture {
        fn new() -> (Self, mpsc::Sender<Command>) {
            let (tx, rx) = mpsc::channel(16);
            let (io, io_handle) = crate::mock::mock();
            (
                Self {
                    client: ClientLoop::new(
                        rx.into(),
                        FrameWriter::rtu(),
                        FramedReader::rtu(),
                        DecodeLevel::nothing(),
                    ),
                    io: PhysLayer::new_mock(io),
                    io_handle,
                },
                tx,
            )
        }

        async fn run_to_shutdown(&mut self) {
            assert_eq!(self.client.run(&mut self.io).await, SessionError::Shutdown);
        }

        fn write_count(&mut self) -> usize {
            let mut count = 0;
            while let Some(event) = self.io_handle.try_next_event() {
                if matches!(event, Event::Write(_)) {
                    count += 1;
                }
            }
            count
        }
    }

    fn read_coils(
        tx: &mpsc::Sender<Command>,
        id: UnitId,
        range: AddressRange,
    ) -> oneshot::Receiver<Result<Vec<Indexed<bool>>, RequestError>> {
        let (promise, rx) = Promise::channel();
        let details =
            RequestDetails::ReadCoils(ReadBits::new(range.of_read_bits().unwrap(), promise));
        tx.try_send(Command::Request(Request::new(id, details)))
            .unwrap();
        rx
    }

    fn write_single_coil(
        tx: &mpsc::Sender<Command>,
        id: UnitId,
        value: Indexed<bool>,
    ) -> oneshot::Receiver<Result<Indexed<bool>, RequestError>> {
        let (promise, rx) = Promise::channel();
        let details = RequestDetails::WriteSingleCoil(SingleWrite::new(value, promise));
        tx.try_send(Command::Request(Request::new(id, details)))
            .unwrap();
        rx
    }

    fn set(tx: &mpsc::Sender<Command>, setting: Setting) {
        tx.try_send(Command::Setting(setting)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn completes_read_coils_from_a_whole_response() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.read(READ_COILS_RESPONSE);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        fixture.run_to_shutdown().await;

        assert_eq!(
            rx.await.unwrap(),
            Ok(vec![
                Indexed::new(10, true),
                Indexed::new(11, false),
                Indexed::new(12, true)
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completes_read_coils_from_a_fragmented_response() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture.io_handle.write(READ_COILS_REQUEST);
        // the six response bytes arrive over four reads
        fixture.io_handle.read(&READ_COILS_RESPONSE[0..1]);
        fixture.io_handle.read(&READ_COILS_RESPONSE[1..4]);
        fixture.io_handle.read(&READ_COILS_RESPONSE[4..5]);
        fixture.io_handle.read(&READ_COILS_RESPONSE[5..6]);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        fixture.run_to_shutdown().await;

        assert_eq!(
            rx.await.unwrap(),
            Ok(vec![
                Indexed::new(10, true),
                Indexed::new(11, false),
                Indexed::new(12, true)
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_crc_completes_the_request_without_a_retry() {
        let (mut fixture, tx) = ClientFixture::new();

        set(&tx, Setting::RetryTimes(2));

        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture
            .io_handle
            .read(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x00]); // final CRC byte corrupted

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        fixture.run_to_shutdown().await;

        assert_eq!(
            rx.await.unwrap(),
            Err(RequestError::BadFrame(
                FrameParseError::CrcValidationFailure(0x0091, 0x8B91)
            ))
        );
        // a single write: framing failures do not consume the retry budget
        assert_eq!(fixture.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_timeout_then_fails_with_response_timeout() {
        let (mut fixture, tx) = ClientFixture::new();

        set(&tx, Setting::RetryTimes(2));
        set(&tx, Setting::ResponseTimeout(Duration::from_millis(500)));

        // three write attempts, no response bytes at all
        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.write(READ_COILS_REQUEST);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        let start = Instant::now();
        fixture.run_to_shutdown().await;

        assert_eq!(rx.await.unwrap(), Err(RequestError::ResponseTimeout));
        assert_eq!(fixture.write_count(), 3);
        // three frame intervals and three timeout windows elapse
        assert_eq!(start.elapsed(), Duration::from_millis(3 * 60 + 3 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn discards_response_from_wrong_server_address_and_times_out() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture.io_handle.write(READ_COILS_REQUEST);
        // valid frame, but from unit 0x02 instead of 0x01
        fixture
            .io_handle
            .read(&[0x02, 0x01, 0x01, 0x05, 0x91, 0xCF]);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        fixture.run_to_shutdown().await;

        assert_eq!(rx.await.unwrap(), Err(RequestError::ResponseTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_completes_after_turnaround_and_next_request_proceeds() {
        let (mut fixture, tx) = ClientFixture::new();

        // broadcast write single coil, then a unicast read on the same wire
        fixture
            .io_handle
            .write(&[0x00, 0x05, 0x00, 0x0A, 0xFF, 0x00, 0xAD, 0xE9]);
        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.read(READ_COILS_RESPONSE);

        let rx_write = write_single_coil(&tx, UnitId::broadcast(), Indexed::new(10, true));
        let rx_read = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        let start = Instant::now();
        fixture.run_to_shutdown().await;

        // no response was consumed for the broadcast, yet it completed
        assert_eq!(rx_write.await.unwrap(), Ok(Indexed::new(10, true)));
        assert_eq!(
            rx_read.await.unwrap(),
            Ok(vec![
                Indexed::new(10, true),
                Indexed::new(11, false),
                Indexed::new(12, true)
            ])
        );
        // the second frame goes out only after the turnaround pause
        assert!(start.elapsed() >= Duration::from_millis(60 + 200 + 60));
    }

    #[tokio::test(start_paused = true)]
    async fn exception_response_completes_with_the_mapped_error() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.read(&[0x01, 0x81, 0x02, 0xC1, 0x91]);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        drop(tx);

        fixture.run_to_shutdown().await;

        assert_eq!(
            rx.await.unwrap(),
            Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completions_preserve_fifo_order() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture.io_handle.write(READ_COILS_REQUEST);
        fixture.io_handle.read(READ_COILS_RESPONSE);
        fixture
            .io_handle
            .write(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00, 0xAC, 0x38]);
        fixture
            .io_handle
            .read(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00, 0xAC, 0x38]);

        let rx_read = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        let rx_write = write_single_coil(&tx, UnitId::new(1), Indexed::new(10, true));
        drop(tx);

        fixture.run_to_shutdown().await;

        let mut read_done = rx_read;
        // the first request must already be resolved when the second one is
        let read_result = read_done
            .try_recv()
            .expect("read did not complete before write");
        assert!(read_result.is_ok());
        assert_eq!(rx_write.await.unwrap(), Ok(Indexed::new(10, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_bytes_are_discarded_before_the_next_request() {
        let (mut fixture, tx) = ClientFixture::new();

        // the first response arrives with trailing garbage that must not be
        // attributed to the second transaction
        fixture.io_handle.write(READ_COILS_REQUEST);
        let mut with_garbage = READ_COILS_RESPONSE.to_vec();
        with_garbage.extend_from_slice(&[0xDE, 0xAD]);
        fixture.io_handle.read(&with_garbage);

        fixture
            .io_handle
            .write(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00, 0xAC, 0x38]);
        fixture
            .io_handle
            .read(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00, 0xAC, 0x38]);

        let rx_read = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());
        let rx_write = write_single_coil(&tx, UnitId::new(1), Indexed::new(10, true));
        drop(tx);

        fixture.run_to_shutdown().await;

        assert!(rx_read.await.unwrap().is_ok());
        assert_eq!(rx_write.await.unwrap(), Ok(Indexed::new(10, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_error_fails_the_request_and_ends_the_session() {
        let (mut fixture, tx) = ClientFixture::new();

        fixture
            .io_handle
            .write_error(std::io::ErrorKind::BrokenPipe);

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());

        assert_eq!(
            fixture.client.run(&mut fixture.io).await,
            SessionError::IoError(std::io::ErrorKind::BrokenPipe)
        );
        assert_eq!(
            rx.await.unwrap(),
            Err(RequestError::Io(std::io::ErrorKind::BrokenPipe))
        );
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_fail_fast_while_the_channel_reconnects() {
        let (mut fixture, tx) = ClientFixture::new();

        let rx = read_coils(&tx, UnitId::new(1), AddressRange::try_from(10, 3).unwrap());

        fixture
            .client
            .fail_requests_for(Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), Err(RequestError::NoConnection));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn task_completes_with_shutdown_error_when_sender_dropped() {
        let (mut fixture, tx) = ClientFixture::new();
        drop(tx);

        fixture.run_to_shutdown().await;
    }
}
