//! S7 link against a scripted controller on a local socket

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use vision_gateway::plc::{
    CommandGate, ControllerLink, Endpoint, LinkError, LinkState, RetryPolicy, S7Link, StopCommand,
    VISION_STOP,
};

/// Controller side of one ISO-on-TCP session
struct FakePlc {
    stream: TcpStream,
}

impl FakePlc {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self { stream }
    }

    /// Payload of the next TPKT frame
    async fn read_frame(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x03);
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn send(&mut self, payload: &[u8]) {
        let len = (payload.len() + 4) as u16;
        let mut frame = vec![0x03, 0x00];
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn send_ack(&mut self, pdu_ref: [u8; 2], params: &[u8], data: &[u8]) {
        let mut payload = vec![0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00];
        payload.extend_from_slice(&pdu_ref);
        payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
        payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(params);
        payload.extend_from_slice(data);
        self.send(&payload).await;
    }

    /// Answer the connect and setup handshake; returns the called TSAP byte
    async fn handshake(&mut self) -> u8 {
        let request = self.read_frame().await;
        assert_eq!(request[1], 0xE0);
        let tsap = *request.last().unwrap();
        self.send(&[0x06, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00]).await;

        let setup = self.read_frame().await;
        assert_eq!(setup[3], 0x32);
        assert_eq!(setup[13], 0xF0);
        let pdu_ref = [setup[7], setup[8]];
        self.send_ack(pdu_ref, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0], &[])
            .await;
        tsap
    }

    /// Accept one write job and answer with `return_code`; returns the value written
    async fn answer_write(&mut self, return_code: u8) -> bool {
        self.answer_write_after(Duration::ZERO, return_code).await
    }

    /// Like [`answer_write`](Self::answer_write), holding the ack back for `delay`
    async fn answer_write_after(&mut self, delay: Duration, return_code: u8) -> bool {
        let job = self.read_frame().await;
        tokio::time::sleep(delay).await;
        assert_eq!(job[13], 0x05);
        let pdu_ref = [job[7], job[8]];
        let value = *job.last().unwrap() == 1;
        self.send_ack(pdu_ref, &[0x05, 0x01], &[return_code]).await;
        value
    }
}

async fn local_endpoint(rack: u8, slot: u8) -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut endpoint = Endpoint::new("127.0.0.1", rack, slot);
    endpoint.port = listener.local_addr().unwrap().port();
    (listener, endpoint)
}

#[tokio::test]
async fn opens_session_and_writes_stop_bit() {
    let (listener, endpoint) = local_endpoint(0, 2).await;

    let plc = tokio::spawn(async move {
        let mut plc = FakePlc::accept(&listener).await;
        let tsap = plc.handshake().await;
        let first = plc.answer_write(0xFF).await;
        let second = plc.answer_write(0xFF).await;
        (tsap, first, second)
    });

    let link = S7Link::new();
    let mut session = link.open(&endpoint).await.unwrap();
    assert_eq!(session.pdu_size(), 240);
    link.write_bit(&mut session, &VISION_STOP, true).await.unwrap();
    link.write_bit(&mut session, &VISION_STOP, false).await.unwrap();
    link.close(session).await;

    let (tsap, first, second) = plc.await.unwrap();
    assert_eq!(tsap, 0x02);
    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn rejected_write_is_a_protocol_error() {
    let (listener, endpoint) = local_endpoint(0, 1).await;

    let plc = tokio::spawn(async move {
        let mut plc = FakePlc::accept(&listener).await;
        plc.handshake().await;
        plc.answer_write(0x0A).await;
    });

    let link = S7Link::new();
    let mut session = link.open(&endpoint).await.unwrap();
    let err = link
        .write_bit(&mut session, &VISION_STOP, true)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Protocol(_)));
    plc.await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let (listener, endpoint) = local_endpoint(0, 1).await;
    drop(listener);

    let err = S7Link::new().open(&endpoint).await.unwrap_err();
    assert!(matches!(err, LinkError::Unreachable(_)));
}

#[tokio::test]
async fn dropped_connection_faults_the_gate() {
    let (listener, endpoint) = local_endpoint(0, 1).await;
    let (drop_tx, drop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut plc = FakePlc::accept(&listener).await;
        plc.handshake().await;
        plc.answer_write(0xFF).await;
        let _ = drop_rx.await;
        drop(plc);
        // Keep the listener open but never answer again
        let _held = listener;
        std::future::pending::<()>().await;
    });

    let (gate, _handle) = CommandGate::start(
        S7Link::new(),
        endpoint,
        RetryPolicy::fixed(Duration::from_secs(5)),
        Duration::from_secs(3),
    );
    let mut states = gate.supervisor().subscribe();
    states.wait_for(|s| *s == LinkState::Ready).await.unwrap();

    assert!(gate.set_stop(true).await);

    drop_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!gate.set_stop(true).await);
    assert_eq!(gate.supervisor().current_state(), LinkState::Disconnected);
    assert!(gate.supervisor().pending_retry().await.is_some());
}

#[tokio::test]
async fn abandoned_write_leaves_session_in_sync() {
    let (listener, endpoint) = local_endpoint(0, 1).await;

    let plc = tokio::spawn(async move {
        let mut plc = FakePlc::accept(&listener).await;
        plc.handshake().await;
        let first = plc
            .answer_write_after(Duration::from_millis(200), 0xFF)
            .await;
        let second = plc.answer_write(0xFF).await;
        (first, second)
    });

    let (gate, _handle) = CommandGate::start(
        S7Link::new(),
        endpoint,
        RetryPolicy::fixed(Duration::from_secs(5)),
        Duration::from_secs(3),
    );
    let mut states = gate.supervisor().subscribe();
    states.wait_for(|s| *s == LinkState::Ready).await.unwrap();

    // The caller gives up while the controller is still acknowledging
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), gate.execute(StopCommand::new(true))).await;
    assert!(abandoned.is_err());

    assert_eq!(gate.execute(StopCommand::new(false)).await, Ok(()));
    assert_eq!(gate.supervisor().current_state(), LinkState::Ready);

    let (first, second) = plc.await.unwrap();
    assert!(first);
    assert!(!second);
}
