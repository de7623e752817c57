//! S7 controller link over ISO-on-TCP
//!
//! Frames are TPKT (RFC 1006) around COTP (ISO 8073) around S7 PDUs.
//! A session is:
//! 1. COTP connection request carrying the rack/slot TSAP, answered by a
//!    connection confirm
//! 2. S7 "setup communication" job negotiating the PDU size
//! 3. any number of "write var" jobs, one per bit write
//!
//! Only what the gateway needs is encoded: single-item writes of one bit to a
//! data block.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::link::{ControllerLink, LinkError};
use super::{Endpoint, Tag};

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 4096;

const COTP_CONNECT_REQUEST: u8 = 0xE0;
const COTP_CONNECT_CONFIRM: u8 = 0xD0;
const COTP_DATA: u8 = 0xF0;
const COTP_DATA_HEADER: [u8; 3] = [0x02, COTP_DATA, 0x80];

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const S7_JOB_HEADER_LEN: usize = 10;
const S7_ACK_HEADER_LEN: usize = 12;

const FN_SETUP_COMMUNICATION: u8 = 0xF0;
const FN_WRITE_VAR: u8 = 0x05;

const AREA_DATA_BLOCK: u8 = 0x84;
const ITEM_SPEC: u8 = 0x12;
const ITEM_ANY_POINTER: [u8; 2] = [0x0A, 0x10];
const TRANSPORT_SIZE_BIT: u8 = 0x01;
const DATA_TRANSPORT_BIT: u8 = 0x03;
const RETURN_CODE_SUCCESS: u8 = 0xFF;

/// PDU size requested during setup communication
pub const REQUESTED_PDU_SIZE: u16 = 480;

/// Link to a real controller
#[derive(Debug, Clone, Default)]
pub struct S7Link;

impl S7Link {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControllerLink for S7Link {
    type Session = S7Session<TcpStream>;

    async fn open(&self, endpoint: &Endpoint) -> Result<Self::Session, LinkError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        S7Session::establish(stream, endpoint.rack, endpoint.slot).await
    }

    async fn write_bit(
        &self,
        session: &mut Self::Session,
        tag: &Tag,
        value: bool,
    ) -> Result<(), LinkError> {
        session.write_bit(tag, value).await
    }

    async fn close(&self, session: Self::Session) {
        session.shutdown().await;
    }
}

/// An established S7 session over any byte stream
#[derive(Debug)]
pub struct S7Session<S> {
    stream: S,
    pdu_ref: u16,
    pdu_size: u16,
}

impl<S> S7Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the COTP connect and S7 setup handshake over `stream`
    pub async fn establish(stream: S, rack: u8, slot: u8) -> Result<Self, LinkError> {
        let mut session = Self {
            stream,
            pdu_ref: 0,
            pdu_size: REQUESTED_PDU_SIZE,
        };

        session
            .stream
            .write_all(&connection_request(rack, slot))
            .await?;
        let confirm = read_frame(&mut session.stream).await?;
        if confirm.len() < 2 || confirm[1] != COTP_CONNECT_CONFIRM {
            return Err(LinkError::Protocol(format!(
                "expected COTP connection confirm, got {:02x?}",
                confirm.get(1)
            )));
        }
        debug!(rack, slot, "COTP connection confirmed");

        let pdu_ref = session.next_ref();
        let params = setup_communication_params(REQUESTED_PDU_SIZE);
        let ack = session.exchange(pdu_ref, &params, &[]).await?;
        if ack.params.len() < 8 || ack.params[0] != FN_SETUP_COMMUNICATION {
            return Err(LinkError::Protocol(
                "malformed setup communication response".into(),
            ));
        }
        session.pdu_size = u16::from_be_bytes([ack.params[6], ack.params[7]]);
        info!(pdu_size = session.pdu_size, "S7 session established");

        Ok(session)
    }

    /// Negotiated PDU size
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Write one bit of a data block
    pub async fn write_bit(&mut self, tag: &Tag, value: bool) -> Result<(), LinkError> {
        let pdu_ref = self.next_ref();
        let ack = self
            .exchange(pdu_ref, &write_bit_params(tag), &write_bit_data(value))
            .await?;

        if ack.params.first() != Some(&FN_WRITE_VAR) {
            return Err(LinkError::Protocol("malformed write var response".into()));
        }
        match ack.data.first() {
            Some(&RETURN_CODE_SUCCESS) => Ok(()),
            Some(code) => Err(LinkError::Protocol(format!(
                "write of {} rejected with return code {:#04x}",
                tag, code
            ))),
            None => Err(LinkError::Protocol("write var response has no data".into())),
        }
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("S7 session shutdown failed: {}", e);
        }
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    async fn exchange(
        &mut self,
        pdu_ref: u16,
        params: &[u8],
        data: &[u8],
    ) -> Result<AckData, LinkError> {
        self.stream.write_all(&s7_job(pdu_ref, params, data)).await?;
        let frame = read_frame(&mut self.stream).await?;
        parse_ack_data(&frame, pdu_ref)
    }
}

/// Parameter and data sections of an acknowledged job
#[derive(Debug)]
struct AckData {
    params: Vec<u8>,
    data: Vec<u8>,
}

fn put_tpkt_header(buf: &mut BytesMut, total_len: usize) {
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0x00);
    buf.put_u16(total_len as u16);
}

/// COTP CR with local TSAP 0x0100 and remote TSAP 0x01 / rack*32+slot
fn connection_request(rack: u8, slot: u8) -> BytesMut {
    let cotp: [u8; 18] = [
        0x11,
        COTP_CONNECT_REQUEST,
        0x00,
        0x00, // destination reference
        0x00,
        0x01, // source reference
        0x00, // class 0
        0xC0,
        0x01,
        0x0A, // TPDU size 1024
        0xC1,
        0x02,
        0x01,
        0x00, // calling TSAP
        0xC2,
        0x02,
        0x01,
        (rack << 5) | (slot & 0x1F), // called TSAP
    ];
    let mut buf = BytesMut::with_capacity(TPKT_HEADER_LEN + cotp.len());
    put_tpkt_header(&mut buf, TPKT_HEADER_LEN + cotp.len());
    buf.put_slice(&cotp);
    buf
}

fn s7_job(pdu_ref: u16, params: &[u8], data: &[u8]) -> BytesMut {
    let total =
        TPKT_HEADER_LEN + COTP_DATA_HEADER.len() + S7_JOB_HEADER_LEN + params.len() + data.len();
    let mut buf = BytesMut::with_capacity(total);
    put_tpkt_header(&mut buf, total);
    buf.put_slice(&COTP_DATA_HEADER);
    buf.put_u8(S7_PROTOCOL_ID);
    buf.put_u8(ROSCTR_JOB);
    buf.put_u16(0x0000);
    buf.put_u16(pdu_ref);
    buf.put_u16(params.len() as u16);
    buf.put_u16(data.len() as u16);
    buf.put_slice(params);
    buf.put_slice(data);
    buf
}

fn setup_communication_params(pdu_size: u16) -> Vec<u8> {
    let mut params = vec![FN_SETUP_COMMUNICATION, 0x00, 0x00, 0x01, 0x00, 0x01];
    params.extend_from_slice(&pdu_size.to_be_bytes());
    params
}

fn write_bit_params(tag: &Tag) -> Vec<u8> {
    let address = tag.bit_address().to_be_bytes();
    let mut params = vec![FN_WRITE_VAR, 0x01, ITEM_SPEC];
    params.extend_from_slice(&ITEM_ANY_POINTER);
    params.push(TRANSPORT_SIZE_BIT);
    params.extend_from_slice(&1u16.to_be_bytes());
    params.extend_from_slice(&tag.db.to_be_bytes());
    params.push(AREA_DATA_BLOCK);
    params.extend_from_slice(&address[1..]);
    params
}

fn write_bit_data(value: bool) -> [u8; 5] {
    [0x00, DATA_TRANSPORT_BIT, 0x00, 0x01, u8::from(value)]
}

/// Read one TPKT frame and return everything after the TPKT header
async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>, LinkError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    if header[0] != TPKT_VERSION {
        return Err(LinkError::Protocol(format!(
            "unexpected TPKT version {:#04x}",
            header[0]
        )));
    }

    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if !(TPKT_HEADER_LEN + 2..=MAX_FRAME_LEN).contains(&len) {
        return Err(LinkError::Protocol(format!("invalid TPKT length {}", len)));
    }

    let mut payload = vec![0u8; len - TPKT_HEADER_LEN];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Validate a COTP data frame holding an S7 ack-data PDU for `pdu_ref`
fn parse_ack_data(payload: &[u8], pdu_ref: u16) -> Result<AckData, LinkError> {
    if payload.len() < COTP_DATA_HEADER.len() || payload[1] != COTP_DATA {
        return Err(LinkError::Protocol("expected COTP data frame".into()));
    }
    let pdu = &payload[COTP_DATA_HEADER.len()..];
    if pdu.len() < S7_ACK_HEADER_LEN || pdu[0] != S7_PROTOCOL_ID {
        return Err(LinkError::Protocol("malformed S7 header".into()));
    }
    if pdu[1] != ROSCTR_ACK_DATA {
        return Err(LinkError::Protocol(format!(
            "unexpected S7 message type {:#04x}",
            pdu[1]
        )));
    }

    let response_ref = u16::from_be_bytes([pdu[4], pdu[5]]);
    if response_ref != pdu_ref {
        return Err(LinkError::Protocol(format!(
            "PDU reference mismatch: sent {}, got {}",
            pdu_ref, response_ref
        )));
    }

    let (error_class, error_code) = (pdu[10], pdu[11]);
    if error_class != 0 || error_code != 0 {
        return Err(LinkError::Protocol(format!(
            "job rejected with error class {:#04x} code {:#04x}",
            error_class, error_code
        )));
    }

    let params_len = u16::from_be_bytes([pdu[6], pdu[7]]) as usize;
    let data_len = u16::from_be_bytes([pdu[8], pdu[9]]) as usize;
    let body = &pdu[S7_ACK_HEADER_LEN..];
    if body.len() < params_len + data_len {
        return Err(LinkError::Protocol("truncated S7 response".into()));
    }

    Ok(AckData {
        params: body[..params_len].to_vec(),
        data: body[params_len..params_len + data_len].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::VISION_STOP;
    use std::io;
    use tokio_test::io::Builder;

    /// TPKT-wrapped S7 ack-data frame
    fn ack_frame(pdu_ref: u16, params: &[u8], data: &[u8], error: (u8, u8)) -> Vec<u8> {
        let total = 4 + 3 + 12 + params.len() + data.len();
        let mut frame = vec![0x03, 0x00];
        frame.extend_from_slice(&(total as u16).to_be_bytes());
        frame.extend_from_slice(&COTP_DATA_HEADER);
        frame.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_ACK_DATA, 0x00, 0x00]);
        frame.extend_from_slice(&pdu_ref.to_be_bytes());
        frame.extend_from_slice(&(params.len() as u16).to_be_bytes());
        frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
        frame.extend_from_slice(&[error.0, error.1]);
        frame.extend_from_slice(params);
        frame.extend_from_slice(data);
        frame
    }

    fn connection_confirm() -> Vec<u8> {
        vec![
            0x03, 0x00, 0x00, 0x16, 0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A,
            0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x01,
        ]
    }

    fn setup_ack(pdu_ref: u16, pdu_size: u16) -> Vec<u8> {
        let mut params = vec![FN_SETUP_COMMUNICATION, 0x00, 0x00, 0x01, 0x00, 0x01];
        params.extend_from_slice(&pdu_size.to_be_bytes());
        ack_frame(pdu_ref, &params, &[], (0, 0))
    }

    #[test]
    fn test_connection_request_encodes_rack_and_slot() {
        let frame = connection_request(0, 1);
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 0x16]);
        assert_eq!(frame[5], COTP_CONNECT_REQUEST);
        assert_eq!(frame[21], 0x01);

        let frame = connection_request(1, 2);
        assert_eq!(frame[21], 0x22);
    }

    #[test]
    fn test_write_job_layout() {
        let frame = s7_job(7, &write_bit_params(&Tag::bit("T", 1, 2, 3)), &write_bit_data(true));
        assert_eq!(frame.len(), 4 + 3 + 10 + 14 + 5);
        // header: protocol id, job, reserved, ref 7, 14 param bytes, 5 data bytes
        assert_eq!(
            &frame[7..17],
            &[0x32, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x0E, 0x00, 0x05]
        );
        // item: bit transport, one element, DB1, area DB, address 2*8+3
        assert_eq!(
            &frame[17..31],
            &[0x05, 0x01, 0x12, 0x0A, 0x10, 0x01, 0x00, 0x01, 0x00, 0x01, 0x84, 0x00, 0x00, 0x13]
        );
        assert_eq!(&frame[31..], &[0x00, 0x03, 0x00, 0x01, 0x01]);
    }

    #[tokio::test]
    async fn test_establish_negotiates_pdu_size() {
        let stream = Builder::new()
            .write(&connection_request(0, 1))
            .read(&connection_confirm())
            .write(&s7_job(1, &setup_communication_params(REQUESTED_PDU_SIZE), &[]))
            .read(&setup_ack(1, 240))
            .build();

        let session = S7Session::establish(stream, 0, 1).await.unwrap();
        assert_eq!(session.pdu_size(), 240);
    }

    #[tokio::test]
    async fn test_establish_rejects_non_confirm() {
        let mut refused = connection_confirm();
        refused[5] = 0x80; // disconnect request
        let stream = Builder::new()
            .write(&connection_request(0, 1))
            .read(&refused)
            .build();

        let err = S7Session::establish(stream, 0, 1).await.unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_write_bit_success_and_rejection() {
        let params = write_bit_params(&VISION_STOP);
        let stream = Builder::new()
            .write(&s7_job(1, &params, &write_bit_data(true)))
            .read(&ack_frame(1, &[FN_WRITE_VAR, 0x01], &[RETURN_CODE_SUCCESS], (0, 0)))
            .write(&s7_job(2, &params, &write_bit_data(false)))
            .read(&ack_frame(2, &[FN_WRITE_VAR, 0x01], &[0x0A], (0, 0)))
            .build();
        let mut session = S7Session {
            stream,
            pdu_ref: 0,
            pdu_size: REQUESTED_PDU_SIZE,
        };

        session.write_bit(&VISION_STOP, true).await.unwrap();
        let err = session.write_bit(&VISION_STOP, false).await.unwrap_err();
        assert!(err.to_string().contains("return code 0x0a"));
    }

    #[tokio::test]
    async fn test_write_bit_on_reset_is_unreachable() {
        let stream = Builder::new()
            .write(&s7_job(1, &write_bit_params(&VISION_STOP), &write_bit_data(true)))
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut session = S7Session {
            stream,
            pdu_ref: 0,
            pdu_size: REQUESTED_PDU_SIZE,
        };

        let err = session.write_bit(&VISION_STOP, true).await.unwrap_err();
        assert!(matches!(err, LinkError::Unreachable(_)));
    }

    #[test]
    fn test_ack_with_error_class_is_protocol_error() {
        let frame = ack_frame(3, &[FN_WRITE_VAR, 0x01], &[RETURN_CODE_SUCCESS], (0x81, 0x04));
        let err = parse_ack_data(&frame[4..], 3).unwrap_err();
        assert!(err.to_string().contains("error class 0x81"));
    }

    #[test]
    fn test_ack_with_wrong_reference_is_rejected() {
        let frame = ack_frame(4, &[FN_WRITE_VAR, 0x01], &[RETURN_CODE_SUCCESS], (0, 0));
        assert!(parse_ack_data(&frame[4..], 5).is_err());
    }
}
