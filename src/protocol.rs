//! Wire protocol for tracker-host ↔ segmentation-server communication.
//!
//! All integers are big-endian. A request carries the hue range of every
//! registered tracker plus one raw BGRA frame; a response echoes the request
//! timestamp and carries one position per query (-1/-1 when not found).
//! The unframed ASCII sentinel `END_OF_CONNECTION` before stream close
//! signals orderly shutdown instead of a protocol error.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, ProtocolError};
use crate::frame::{ColorFrame, TrackerQuery, BYTES_PER_PIXEL_BGRA};

/// Sent unframed by the host before closing its write side.
pub const END_OF_CONNECTION: &[u8] = b"END_OF_CONNECTION";

/// Sanity bound on the per-frame query list.
pub const MAX_QUERY_COUNT: i32 = 4096;

/// Maximum accepted frame payload (16MB).
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// The per-tracker acceptance window carried on the wire. The remaining
/// thresholds (saturation, brightness, area floor) are server-side config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HueRange {
    pub min_hue: i32,
    pub max_hue: i32,
}

impl From<&TrackerQuery> for HueRange {
    fn from(query: &TrackerQuery) -> Self {
        Self {
            min_hue: query.min_hue,
            max_hue: query.max_hue,
        }
    }
}

/// Host → server. Owns one frame snapshot and the ordered query list;
/// responses are keyed by index into that list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub queries: Vec<HueRange>,
    pub timestamp_millis: i64,
    pub frame_width: i32,
    /// Raw BGRA pixel bytes; height is payload_len / (4 * width).
    pub payload: Vec<u8>,
}

impl RequestFrame {
    /// Reassemble the raw payload into a ColorFrame, consuming the request.
    pub fn into_color_frame(self) -> Result<(Vec<HueRange>, i64, ColorFrame), FrameError> {
        let width = self.frame_width.max(0) as u32;
        let row_bytes = width as usize * BYTES_PER_PIXEL_BGRA;

        if row_bytes == 0 {
            if self.payload.is_empty() {
                let frame = ColorFrame::new(0, 0, BYTES_PER_PIXEL_BGRA, Vec::new())?;
                return Ok((self.queries, self.timestamp_millis, frame));
            }
            return Err(FrameError::PayloadMismatch {
                len: self.payload.len(),
                width,
                bpp: BYTES_PER_PIXEL_BGRA,
            });
        }
        if self.payload.len() % row_bytes != 0 {
            return Err(FrameError::PayloadMismatch {
                len: self.payload.len(),
                width,
                bpp: BYTES_PER_PIXEL_BGRA,
            });
        }

        let height = (self.payload.len() / row_bytes) as u32;
        let frame = ColorFrame::new(width, height, BYTES_PER_PIXEL_BGRA, self.payload)?;
        Ok((self.queries, self.timestamp_millis, frame))
    }
}

/// Server → host. `results[i]` answers `queries[i]` of the request whose
/// timestamp is echoed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub timestamp_millis: i64,
    pub results: Vec<Option<(u32, u32)>>,
}

/// What the server reads off the stream: a request, or the shutdown sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMessage {
    Frame(RequestFrame),
    EndOfSession,
}

fn peek_i32(src: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

pub fn encode_request(req: &RequestFrame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    if req.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::FrameTooLarge(
            req.payload.len(),
            MAX_PAYLOAD_BYTES,
        ));
    }
    dst.reserve(4 + req.queries.len() * 8 + 16 + req.payload.len());
    dst.put_i32(req.queries.len() as i32);
    for q in &req.queries {
        dst.put_i32(q.min_hue);
        dst.put_i32(q.max_hue);
    }
    dst.put_i64(req.timestamp_millis);
    dst.put_i32(req.frame_width);
    dst.put_i32(req.payload.len() as i32);
    dst.extend_from_slice(&req.payload);
    Ok(())
}

/// Incremental decode. Returns Ok(None) until a whole message is buffered.
pub fn decode_request(src: &mut BytesMut) -> Result<Option<RequestMessage>, ProtocolError> {
    // Shutdown sentinel first: a real header never starts with these bytes
    // because "END_" read as a count is far above MAX_QUERY_COUNT.
    let n = src.len().min(END_OF_CONNECTION.len());
    if n > 0 && src[..n] == END_OF_CONNECTION[..n] {
        if src.len() < END_OF_CONNECTION.len() {
            return Ok(None);
        }
        src.advance(END_OF_CONNECTION.len());
        return Ok(Some(RequestMessage::EndOfSession));
    }

    if src.len() < 4 {
        return Ok(None);
    }
    let query_count = peek_i32(src, 0);
    if !(0..=MAX_QUERY_COUNT).contains(&query_count) {
        return Err(ProtocolError::CountOutOfRange {
            field: "query_count",
            value: query_count as i64,
        });
    }
    let qc = query_count as usize;

    let fixed = 4 + qc * 8 + 8 + 4 + 4;
    if src.len() < fixed {
        return Ok(None);
    }

    let frame_width = peek_i32(src, fixed - 8);
    if frame_width < 0 {
        return Err(ProtocolError::InvalidField {
            field: "frame_width",
            value: frame_width as i64,
        });
    }
    let payload_len = peek_i32(src, fixed - 4);
    if payload_len < 0 {
        return Err(ProtocolError::InvalidField {
            field: "payload_length",
            value: payload_len as i64,
        });
    }
    if payload_len as usize > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::FrameTooLarge(
            payload_len as usize,
            MAX_PAYLOAD_BYTES,
        ));
    }

    let total = fixed + payload_len as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(4);
    let mut queries = Vec::with_capacity(qc);
    for _ in 0..qc {
        let min_hue = src.get_i32();
        let max_hue = src.get_i32();
        queries.push(HueRange { min_hue, max_hue });
    }
    let timestamp_millis = src.get_i64();
    let frame_width = src.get_i32();
    let payload_len = src.get_i32() as usize;
    let payload = src.split_to(payload_len).to_vec();

    Ok(Some(RequestMessage::Frame(RequestFrame {
        queries,
        timestamp_millis,
        frame_width,
        payload,
    })))
}

pub fn encode_response(resp: &ResponseFrame, dst: &mut BytesMut) {
    dst.reserve(4 + 8 + resp.results.len() * 8);
    dst.put_i32(resp.results.len() as i32);
    dst.put_i64(resp.timestamp_millis);
    for result in &resp.results {
        match result {
            Some((x, y)) => {
                dst.put_i32(*x as i32);
                dst.put_i32(*y as i32);
            }
            None => {
                dst.put_i32(-1);
                dst.put_i32(-1);
            }
        }
    }
}

pub fn decode_response(src: &mut BytesMut) -> Result<Option<ResponseFrame>, ProtocolError> {
    if src.len() < 4 {
        return Ok(None);
    }
    let result_count = peek_i32(src, 0);
    if !(0..=MAX_QUERY_COUNT).contains(&result_count) {
        return Err(ProtocolError::CountOutOfRange {
            field: "result_count",
            value: result_count as i64,
        });
    }
    let rc = result_count as usize;

    let total = 4 + 8 + rc * 8;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(4);
    let timestamp_millis = src.get_i64();
    let mut results = Vec::with_capacity(rc);
    for _ in 0..rc {
        let x = src.get_i32();
        let y = src.get_i32();
        if x < 0 || y < 0 {
            results.push(None);
        } else {
            results.push(Some((x as u32, y as u32)));
        }
    }

    Ok(Some(ResponseFrame {
        timestamp_millis,
        results,
    }))
}

// --- tokio-util codecs ---

/// Codec for the segmentation-server side of the stream.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_request(src)
    }
}

impl Encoder<ResponseFrame> for ServerCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_response(&item, dst);
        Ok(())
    }
}

/// Codec for the tracker-host side of the stream.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_response(src)
    }
}

impl Encoder<RequestMessage> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: RequestMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RequestMessage::Frame(frame) => encode_request(&frame, dst),
            RequestMessage::EndOfSession => {
                dst.extend_from_slice(END_OF_CONNECTION);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> RequestFrame {
        RequestFrame {
            queries: vec![
                HueRange {
                    min_hue: 40,
                    max_hue: 80,
                },
                HueRange {
                    min_hue: 0,
                    max_hue: 10,
                },
            ],
            timestamp_millis: 1_700_000_000_123,
            frame_width: 2,
            payload: vec![0u8; 16], // 2x2 BGRA
        }
    }

    #[test]
    fn test_request_round_trip() {
        let req = sample_request();
        let mut buf = BytesMut::new();
        encode_request(&req, &mut buf).unwrap();

        let decoded = decode_request(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, RequestMessage::Frame(req));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_request_round_trip_zero_queries() {
        let req = RequestFrame {
            queries: vec![],
            timestamp_millis: 42,
            frame_width: 0,
            payload: vec![],
        };
        let mut buf = BytesMut::new();
        encode_request(&req, &mut buf).unwrap();
        let decoded = decode_request(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, RequestMessage::Frame(req));
    }

    #[test]
    fn test_response_round_trip() {
        let resp = ResponseFrame {
            timestamp_millis: 99,
            results: vec![Some((19, 19)), None, Some((0, 480))],
        };
        let mut buf = BytesMut::new();
        encode_response(&resp, &mut buf);
        let decoded = decode_response(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, resp);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_response_round_trip_zero_results() {
        let resp = ResponseFrame {
            timestamp_millis: 7,
            results: vec![],
        };
        let mut buf = BytesMut::new();
        encode_response(&resp, &mut buf);
        assert_eq!(decode_response(&mut buf).unwrap().unwrap(), resp);
    }

    #[test]
    fn test_not_found_encodes_as_minus_one() {
        let resp = ResponseFrame {
            timestamp_millis: 0,
            results: vec![None],
        };
        let mut buf = BytesMut::new();
        encode_response(&resp, &mut buf);
        // count(4) + timestamp(8) + posX(4) + posY(4)
        assert_eq!(&buf[12..16], (-1i32).to_be_bytes());
        assert_eq!(&buf[16..20], (-1i32).to_be_bytes());
    }

    #[test]
    fn test_partial_request_waits_for_more() {
        let req = sample_request();
        let mut full = BytesMut::new();
        encode_request(&req, &mut full).unwrap();

        let mut buf = BytesMut::new();
        // ヘッダ途中まで
        buf.extend_from_slice(&full[..10]);
        assert_eq!(decode_request(&mut buf).unwrap(), None);
        // ペイロード途中まで
        buf.extend_from_slice(&full[10..full.len() - 3]);
        assert_eq!(decode_request(&mut buf).unwrap(), None);
        // 残り
        buf.extend_from_slice(&full[full.len() - 3..]);
        assert_eq!(
            decode_request(&mut buf).unwrap(),
            Some(RequestMessage::Frame(req))
        );
    }

    #[test]
    fn test_two_requests_back_to_back() {
        let req = sample_request();
        let mut buf = BytesMut::new();
        encode_request(&req, &mut buf).unwrap();
        encode_request(&req, &mut buf).unwrap();

        assert!(decode_request(&mut buf).unwrap().is_some());
        assert!(decode_request(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_sentinel_decodes_as_end_of_session() {
        let mut buf = BytesMut::from(&END_OF_CONNECTION[..]);
        assert_eq!(
            decode_request(&mut buf).unwrap(),
            Some(RequestMessage::EndOfSession)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_sentinel_waits() {
        let mut buf = BytesMut::from(&END_OF_CONNECTION[..8]);
        assert_eq!(decode_request(&mut buf).unwrap(), None);
        buf.extend_from_slice(&END_OF_CONNECTION[8..]);
        assert_eq!(
            decode_request(&mut buf).unwrap(),
            Some(RequestMessage::EndOfSession)
        );
    }

    #[test]
    fn test_absurd_query_count_is_error() {
        let mut buf = BytesMut::new();
        buf.put_i32(1_000_000);
        assert!(decode_request(&mut buf).is_err());
    }

    #[test]
    fn test_negative_payload_length_is_error() {
        let mut buf = BytesMut::new();
        buf.put_i32(0); // query_count
        buf.put_i64(0); // timestamp
        buf.put_i32(10); // frame_width
        buf.put_i32(-5); // payload_length
        assert!(decode_request(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_payload_is_error() {
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        buf.put_i64(0);
        buf.put_i32(10);
        buf.put_i32((MAX_PAYLOAD_BYTES + 1) as i32);
        assert!(matches!(
            decode_request(&mut buf),
            Err(ProtocolError::FrameTooLarge(_, _))
        ));
    }

    #[test]
    fn test_absurd_result_count_is_error() {
        let mut buf = BytesMut::new();
        buf.put_i32(MAX_QUERY_COUNT + 1);
        assert!(decode_response(&mut buf).is_err());
    }

    #[test]
    fn test_into_color_frame() {
        let req = RequestFrame {
            queries: vec![],
            timestamp_millis: 5,
            frame_width: 2,
            payload: vec![0u8; 24], // 2x3 BGRA
        };
        let (_, ts, frame) = req.into_color_frame().unwrap();
        assert_eq!(ts, 5);
        assert_eq!(frame.resolution(), (2, 3));
    }

    #[test]
    fn test_into_color_frame_rejects_ragged_payload() {
        let req = RequestFrame {
            queries: vec![],
            timestamp_millis: 5,
            frame_width: 3,
            payload: vec![0u8; 25], // 3*4=12で割り切れない
        };
        assert!(req.into_color_frame().is_err());
    }
}
