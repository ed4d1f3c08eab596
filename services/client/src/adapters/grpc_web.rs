//! services/client/src/adapters/grpc_web.rs
//!
//! This module contains the adapter for the song streaming backend, reached
//! through a gRPC-web proxy. It implements the `SongStreamService` port from
//! the `core` crate.
//!
//! Only the small part of gRPC-web and protobuf the call needs is handled
//! here: length-prefixed frames, the trailer frame and two message shapes.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use listening_room_core::domain::SongRequest;
use listening_room_core::ports::{ChunkStream, PortError, PortResult, SongStreamService};
use tracing::{debug, info};

const CONTENT_TYPE: &str = "application/grpc-web+proto";
const FRAME_HEADER_LEN: usize = 5;
const TRAILER_FLAG: u8 = 0x80;
const COMPRESSED_FLAG: u8 = 0x01;
/// Largest frame accepted from the proxy.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// gRPC status code for a missing resource.
const STATUS_NOT_FOUND: u32 = 5;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SongStreamService` port over gRPC-web.
#[derive(Clone)]
pub struct GrpcWebSongAdapter {
    client: reqwest::Client,
    url: String,
}

impl GrpcWebSongAdapter {
    /// Creates a new adapter calling `{endpoint}{rpc_path}`.
    pub fn new(client: reqwest::Client, endpoint: &str, rpc_path: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), rpc_path),
        }
    }
}

//=========================================================================================
// `SongStreamService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SongStreamService for GrpcWebSongAdapter {
    async fn stream_song(&self, request: &SongRequest) -> PortResult<ChunkStream> {
        info!(title = %request.title, format = %request.format, "Opening song stream");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .header("x-grpc-web", "1")
            .body(encode_frame(&encode_song_request(request)))
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Transport(format!(
                "streaming proxy answered HTTP {}",
                response.status()
            )));
        }

        // A trailers-only response carries its status in the headers.
        if let Some(status) = response.headers().get("grpc-status") {
            let code = status
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let message = response
                .headers()
                .get("grpc-message")
                .and_then(|m| m.to_str().ok())
                .unwrap_or_default();
            check_status(code, message)?;
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| PortError::Transport(e.to_string())));
        Ok(Box::pin(decode_body(body)))
    }
}

/// Turns the raw response body into song fragments.
fn decode_body<S>(body: S) -> impl Stream<Item = PortResult<Bytes>> + Send
where
    S: Stream<Item = PortResult<Bytes>> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = FrameDecoder::default();
        while let Some(chunk) = body.next().await {
            decoder.extend(&chunk?);
            while let Some(frame) = decoder.next_frame()? {
                match frame {
                    GrpcFrame::Data(payload) => yield decode_song_fragment(payload)?,
                    GrpcFrame::Trailers(text) => {
                        let (code, message) = parse_trailers(&text);
                        check_status(code, &message)?;
                    }
                }
            }
        }
        decoder.finish()?;
        debug!("Song stream finished.");
    }
}

fn check_status(code: u32, message: &str) -> PortResult<()> {
    let message = urlencoding::decode(message)
        .map(|m| m.into_owned())
        .unwrap_or_else(|_| message.to_string());
    match code {
        0 => Ok(()),
        STATUS_NOT_FOUND => Err(PortError::NotFound(message)),
        _ => Err(PortError::Transport(format!(
            "grpc-status {}: {}",
            code, message
        ))),
    }
}

//=========================================================================================
// gRPC-web Framing
//=========================================================================================

#[derive(Debug, PartialEq, Eq)]
enum GrpcFrame {
    Data(Bytes),
    Trailers(String),
}

fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(0);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Reassembles frames from body chunks split at arbitrary points.
#[derive(Default)]
struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> PortResult<Option<GrpcFrame>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let flags = self.buffer[0];
        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(PortError::Unexpected(format!(
                "gRPC-web frame of {} bytes exceeds the {} byte limit",
                len, MAX_FRAME_LEN
            )));
        }
        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let payload = self.buffer.split_to(len).freeze();

        if flags & COMPRESSED_FLAG != 0 {
            return Err(PortError::Unexpected(
                "compressed gRPC-web frames are not supported".to_string(),
            ));
        }
        if flags & TRAILER_FLAG != 0 {
            return Ok(Some(GrpcFrame::Trailers(
                String::from_utf8_lossy(&payload).into_owned(),
            )));
        }
        Ok(Some(GrpcFrame::Data(payload)))
    }

    fn finish(&self) -> PortResult<()> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(PortError::Transport(format!(
                "stream ended inside a frame ({} bytes left over)",
                self.buffer.len()
            )))
        }
    }
}

/// Reads `grpc-status` and `grpc-message` from a trailer block.
fn parse_trailers(text: &str) -> (u32, String) {
    let mut code = 0;
    let mut message = String::new();
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "grpc-status" => code = value.trim().parse().unwrap_or(0),
            "grpc-message" => message = value.trim().to_string(),
            _ => {}
        }
    }
    (code, message)
}

//=========================================================================================
// Protobuf Messages
//=========================================================================================

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

/// `{ titulo = 1; formato = 2; }`
fn encode_song_request(request: &SongRequest) -> Bytes {
    let mut buf = BytesMut::new();
    put_string_field(&mut buf, 1, &request.title);
    put_string_field(&mut buf, 2, request.format.extension());
    buf.freeze()
}

fn put_string_field(buf: &mut BytesMut, field: u64, value: &str) {
    if value.is_empty() {
        return;
    }
    put_varint(buf, (field << 3) | WIRE_LEN);
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn get_varint(buf: &mut Bytes) -> PortResult<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            break;
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(PortError::Unexpected("malformed protobuf varint".to_string()))
}

fn take(buf: &mut Bytes, len: usize) -> PortResult<Bytes> {
    if buf.remaining() < len {
        return Err(PortError::Unexpected("truncated protobuf field".to_string()));
    }
    Ok(buf.split_to(len))
}

/// `{ bytes data = 1; }`. Unknown fields are skipped.
fn decode_song_fragment(mut payload: Bytes) -> PortResult<Bytes> {
    let mut data = Bytes::new();
    while payload.has_remaining() {
        let key = get_varint(&mut payload)?;
        let (field, wire_type) = (key >> 3, key & 0x7);
        match wire_type {
            WIRE_VARINT => {
                get_varint(&mut payload)?;
            }
            WIRE_FIXED64 => {
                take(&mut payload, 8)?;
            }
            WIRE_LEN => {
                let len = get_varint(&mut payload)? as usize;
                let value = take(&mut payload, len)?;
                if field == 1 {
                    data = value;
                }
            }
            WIRE_FIXED32 => {
                take(&mut payload, 4)?;
            }
            other => {
                return Err(PortError::Unexpected(format!(
                    "unsupported protobuf wire type {}",
                    other
                )))
            }
        }
    }
    Ok(data)
}
