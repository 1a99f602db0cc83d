use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use modbus_master::*;

/// forwards connection state changes into a channel the test can inspect
struct StateSender(tokio::sync::mpsc::UnboundedSender<ClientState>);

impl Listener<ClientState> for StateSender {
    fn update(&mut self, value: ClientState) {
        self.0.send(value).ok();
    }
}

/// byte-level scripted Modbus TCP server: asserts each request and answers
/// with canned bytes, no protocol engine behind it
async fn scripted_server(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.unwrap();

    // read coils, start == 10, qty == 3
    let mut request = [0u8; 12];
    socket.read_exact(&mut request).await.unwrap();
    assert_eq!(
        request,
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x0A, 0x00, 0x03]
    );
    // coils 10..13 are [ON, OFF, ON]
    socket
        .write_all(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x05])
        .await
        .unwrap();

    // write single register, echoed verbatim
    let mut request = [0u8; 12];
    socket.read_exact(&mut request).await.unwrap();
    assert_eq!(
        request,
        [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0xCA, 0xFE]
    );
    socket
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0xCA, 0xFE])
        .await
        .unwrap();

    // read holding registers answered with an exception PDU
    let mut request = [0u8; 12];
    socket.read_exact(&mut request).await.unwrap();
    assert_eq!(
        request,
        [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
    );
    socket
        .write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02])
        .await
        .unwrap();
}

#[tokio::test]
async fn performs_requests_against_a_scripted_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(scripted_server(listener));

    let (state_tx, mut state_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut channel = spawn_tcp_client_task(
        addr,
        8,
        OpenRetry::default(),
        DecodeLevel::nothing(),
        Some(Box::new(StateSender(state_tx))),
    );

    channel.enable().await.unwrap();
    // keep the test quick, the wire is a loopback socket
    channel
        .set_frame_interval(Duration::from_millis(1))
        .await
        .unwrap();

    assert_eq!(
        channel
            .read_coils(UnitId::new(1), AddressRange::try_from(10, 3).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(10, true),
            Indexed::new(11, false),
            Indexed::new(12, true)
        ]
    );

    assert_eq!(
        channel
            .write_single_register(UnitId::new(1), Indexed::new(1, 0xCAFE))
            .await
            .unwrap(),
        Indexed::new(1, 0xCAFE)
    );

    assert_eq!(
        channel
            .read_holding_registers(UnitId::new(1), AddressRange::try_from(0, 2).unwrap())
            .await,
        Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
    );

    server.await.unwrap();

    // the channel went through disabled -> connecting -> connected
    assert_eq!(state_rx.recv().await, Some(ClientState::Disabled));
    assert_eq!(state_rx.recv().await, Some(ClientState::Connecting));
    assert_eq!(state_rx.recv().await, Some(ClientState::Connected));
}

#[tokio::test]
async fn requests_fail_immediately_while_the_channel_is_disabled() {
    // nothing is listening and the channel is never enabled
    let addr = "127.0.0.1:1".parse().unwrap();
    let mut channel = spawn_tcp_client_task(
        addr,
        8,
        OpenRetry::default(),
        DecodeLevel::nothing(),
        None,
    );

    assert_eq!(
        channel
            .read_coils(UnitId::new(1), AddressRange::try_from(0, 1).unwrap())
            .await,
        Err(RequestError::NoConnection)
    );
}

#[tokio::test]
async fn broadcast_reads_are_rejected_before_reaching_the_wire() {
    let addr = "127.0.0.1:1".parse().unwrap();
    let mut channel = spawn_tcp_client_task(
        addr,
        8,
        OpenRetry::default(),
        DecodeLevel::nothing(),
        None,
    );

    assert_eq!(
        channel
            .read_coils(UnitId::broadcast(), AddressRange::try_from(0, 1).unwrap())
            .await,
        Err(RequestError::BadRequest(InvalidRequest::BroadcastRead))
    );
}
