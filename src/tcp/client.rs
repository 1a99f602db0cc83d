use std::net::SocketAddr;

use crate::client::listener::{ClientState, Listener};
use crate::client::message::{Command, Receiver};
use crate::client::task::{ClientLoop, SessionError};
use crate::common::frame::{FramedReader, FrameWriter};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::Shutdown;
use crate::retry::OpenRetry;

pub(crate) struct TcpChannelTask {
    addr: SocketAddr,
    retry: OpenRetry,
    client_loop: ClientLoop,
    listener: Box<dyn Listener<ClientState>>,
}

impl TcpChannelTask {
    pub(crate) fn new(
        addr: SocketAddr,
        rx: Receiver<Command>,
        retry: OpenRetry,
        decode: DecodeLevel,
        listener: Box<dyn Listener<ClientState>>,
    ) -> Self {
        Self {
            addr,
            retry,
            client_loop: ClientLoop::new(rx, FrameWriter::tcp(), FramedReader::tcp(), decode),
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
            if self.connect_and_run().await.is_err() {
                return Shutdown;
            }
        }
    }

    // Err(Shutdown) is returned only when the command channel closes
    async fn connect_and_run(&mut self) -> Result<(), Shutdown> {
        let mut attempts_left = self.retry.max_attempts();

        while self.client_loop.is_enabled() {
            self.listener.update(ClientState::Connecting);
            match tokio::net::TcpStream::connect(self.addr).await {
                Err(err) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        tracing::error!(
                            "{} - connect retries exhausted, disabling channel",
                            err
                        );
                        self.client_loop.disable();
                        return Ok(());
                    }
                    let delay = self.retry.delay();
                    tracing::warn!("{} - waiting {} ms to reconnect", err, delay.as_millis());
                    self.listener
                        .update(ClientState::WaitAfterFailedConnect(delay));
                    self.client_loop.fail_requests_for(delay).await?;
                }
                Ok(socket) => {
                    if let Err(err) = socket.set_nodelay(true) {
                        tracing::warn!("unable to enable TCP_NODELAY: {}", err);
                    }
                    tracing::info!("connected to {}", self.addr);
                    self.listener.update(ClientState::Connected);
                    let mut phys = PhysLayer::new_tcp(socket);
                    match self.client_loop.run(&mut phys).await {
                        SessionError::Shutdown => return Err(Shutdown),
                        SessionError::Disabled => return Ok(()),
                        SessionError::IoError(_) => {
                            // drain pending requests while the connection is down
                            let delay = self.retry.delay();
                            self.listener.update(ClientState::WaitAfterDisconnect(delay));
                            tracing::warn!(
                                "connection lost, waiting {} ms to reconnect",
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
