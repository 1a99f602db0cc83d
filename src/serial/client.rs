use crate::client::listener::{ClientState, Listener};
use crate::client::message::{Command, Receiver};
use crate::client::task::{ClientLoop, SessionError};
use crate::common::frame::{FramedReader, FrameWriter};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::Shutdown;
use crate::retry::OpenRetry;
use crate::serial::{SerialMode, SerialSettings};

pub(crate) struct SerialChannelTask {
    path: String,
    serial_settings: SerialSettings,
    retry: OpenRetry,
    client_loop: ClientLoop,
    listener: Box<dyn Listener<ClientState>>,
}

impl SerialChannelTask {
    pub(crate) fn new(
        path: &str,
        serial_settings: SerialSettings,
        mode: SerialMode,
        rx: Receiver<Command>,
        retry: OpenRetry,
        decode: DecodeLevel,
        listener: Box<dyn Listener<ClientState>>,
    ) -> Self {
        let (writer, reader) = match mode {
            SerialMode::Rtu => (FrameWriter::rtu(), FramedReader::rtu()),
            SerialMode::Ascii => (FrameWriter::ascii(), FramedReader::ascii()),
        };
        Self {
            path: path.to_string(),
            serial_settings,
            retry,
            client_loop: ClientLoop::new(rx, writer, reader, decode),
            listener,
        }
    }

    pub(crate) async fn run(&mut self) -> Shutdown {
        let ret = self.run_inner().await;
        self.listener.update(ClientState::Shutdown);
        ret
    }

    async fn run_inner(&mut self) -> Shutdown {
        loop {
            self.listener.update(ClientState::Disabled);
            if self.client_loop.wait_for_enabled().await.is_err() {
                return Shutdown;
            }
            if self.open_and_run().await.is_err() {
                return Shutdown;
            }
        }
    }

    // Err(Shutdown) is returned only when the command channel closes
    async fn open_and_run(&mut self) -> Result<(), Shutdown> {
        let mut attempts_left = self.retry.max_attempts();

        while self.client_loop.is_enabled() {
            self.listener.update(ClientState::Connecting);
            match crate::serial::open(self.path.as_str(), self.serial_settings) {
                Err(err) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        tracing::error!("{} - open retries exhausted, disabling channel", err);
                        self.client_loop.disable();
                        return Ok(());
                    }
                    let delay = self.retry.delay();
                    tracing::warn!(
                        "{} - waiting {} ms to re-open port",
                        err,
                        delay.as_millis()
                    );
                    self.listener
                        .update(ClientState::WaitAfterFailedConnect(delay));
                    self.client_loop.fail_requests_for(delay).await?;
                }
                Ok(port) => {
                    tracing::info!("serial port open: {}", self.path);
                    self.listener.update(ClientState::Connected);
                    let mut phys = PhysLayer::new_serial(port);
                    match self.client_loop.run(&mut phys).await {
                        SessionError::Shutdown => return Err(Shutdown),
                        SessionError::Disabled => return Ok(()),
                        SessionError::IoError(_) => {
                            // drain pending requests while the port is re-opened
                            let delay = self.retry.delay();
                            self.listener.update(ClientState::WaitAfterDisconnect(delay));
                            tracing::warn!(
                                "connection lost, waiting {} ms to re-open port",
                                delay.as_millis()
                            );
                            self.client_loop.fail_requests_for(delay).await?;
                            attempts_left = self.retry.max_attempts();
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
