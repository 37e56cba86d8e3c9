//! Reverse-tunnel byte-stream multiplexer.
//!
//! The runner dials in with a WebSocket; the broker binds a loopback TCP
//! listener on the runner's assigned port and turns every accepted
//! connection into one logical stream over the socket. Frames are
//! binary: a 1-byte opcode, a 4-byte big-endian stream id, then payload.
//! Each direction of each stream is pumped by its own task, so
//! backpressure on one side never stalls the other.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

const OP_OPEN: u8 = 1;
const OP_DATA: u8 = 2;
const OP_CLOSE: u8 = 3;

const READ_BUF_SIZE: usize = 16 * 1024;

/// One multiplexer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open { stream_id: u32 },
    Data { stream_id: u32, payload: Bytes },
    Close { stream_id: u32 },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Open { stream_id }
            | Frame::Data { stream_id, .. }
            | Frame::Close { stream_id } => *stream_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload: &[u8] = match self {
            Frame::Data { payload, .. } => payload,
            _ => &[],
        };
        let opcode = match self {
            Frame::Open { .. } => OP_OPEN,
            Frame::Data { .. } => OP_DATA,
            Frame::Close { .. } => OP_CLOSE,
        };

        let mut buf = Vec::with_capacity(5 + payload.len());
        buf.push(opcode);
        buf.extend_from_slice(&self.stream_id().to_be_bytes());
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    /// Decode one frame; `None` for truncated buffers or unknown opcodes.
    pub fn decode(buf: &[u8]) -> Option<Frame> {
        if buf.len() < 5 {
            return None;
        }

        let opcode = buf[0];
        let stream_id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

        match opcode {
            OP_OPEN => Some(Frame::Open { stream_id }),
            OP_DATA => Some(Frame::Data {
                stream_id,
                payload: Bytes::copy_from_slice(&buf[5..]),
            }),
            OP_CLOSE => Some(Frame::Close { stream_id }),
            _ => None,
        }
    }
}

type StreamMap = Arc<Mutex<HashMap<u32, mpsc::Sender<Bytes>>>>;

/// Drive one tunnel session until the WebSocket closes. Every TCP
/// connection accepted on `listener` becomes one logical stream.
pub async fn run_session(ws: WebSocket, listener: TcpListener) {
    let (mut sink, mut ws_stream) = ws.split();
    let streams: StreamMap = Arc::new(Mutex::new(HashMap::new()));

    // single writer owns the WS sink
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Binary(frame.encode())).await.is_err() {
                break;
            }
        }
    });

    // reader dispatches inbound frames to per-stream channels
    let reader_streams = streams.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            let Message::Binary(data) = message else {
                if matches!(message, Message::Close(_)) {
                    break;
                }
                continue;
            };

            let Some(frame) = Frame::decode(&data) else {
                debug!("dropping undecodable tunnel frame ({} bytes)", data.len());
                continue;
            };

            match frame {
                Frame::Data { stream_id, payload } => {
                    let sender = reader_streams.lock().unwrap().get(&stream_id).cloned();
                    match sender {
                        Some(sender) => {
                            if sender.send(payload).await.is_err() {
                                reader_streams.lock().unwrap().remove(&stream_id);
                            }
                        }
                        None => debug!("data for unknown stream {stream_id}"),
                    }
                }
                Frame::Close { stream_id } => {
                    // dropping the sender closes the TCP write side
                    reader_streams.lock().unwrap().remove(&stream_id);
                }
                Frame::Open { stream_id } => {
                    debug!("unexpected OPEN from runner for stream {stream_id}");
                }
            }
        }
    });

    let mut next_stream_id: u32 = 1;

    loop {
        tokio::select! {
            _ = &mut reader => break,
            accepted = listener.accept() => {
                let Ok((tcp, peer)) = accepted else { break };
                let stream_id = next_stream_id;
                next_stream_id = next_stream_id.wrapping_add(1);
                debug!("tunnel stream {stream_id} opened from {peer}");

                let (in_tx, in_rx) = mpsc::channel::<Bytes>(64);
                streams.lock().unwrap().insert(stream_id, in_tx);

                if out_tx.send(Frame::Open { stream_id }).await.is_err() {
                    break;
                }

                spawn_stream_pumps(tcp, stream_id, in_rx, out_tx.clone(), streams.clone());
            }
        }
    }

    info!("tunnel session ended");
    streams.lock().unwrap().clear();
    reader.abort();
    drop(out_tx);
    writer.abort();
}

/// Pump one TCP connection in both directions, each in its own task.
fn spawn_stream_pumps(
    tcp: TcpStream,
    stream_id: u32,
    mut in_rx: mpsc::Receiver<Bytes>,
    out_tx: mpsc::Sender<Frame>,
    streams: StreamMap,
) {
    let (read_half, mut write_half) = tcp.into_split();

    // frames -> TCP
    tokio::spawn(async move {
        while let Some(chunk) = in_rx.recv().await {
            if write_half.write_all(&chunk).await.is_err() {
                break;
            }
        }
        // sender dropped or write failed; closing the half is enough
    });

    // TCP -> frames
    tokio::spawn(async move {
        pump_tcp_reads(read_half, stream_id, &out_tx).await;
        let _ = out_tx.send(Frame::Close { stream_id }).await;
        streams.lock().unwrap().remove(&stream_id);
    });
}

async fn pump_tcp_reads(mut read_half: OwnedReadHalf, stream_id: u32, out_tx: &mpsc::Sender<Frame>) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let frame = Frame::Data {
                    stream_id,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frames = [
            Frame::Open { stream_id: 1 },
            Frame::Data {
                stream_id: 42,
                payload: Bytes::from_static(b"hello"),
            },
            Frame::Close { stream_id: u32::MAX },
        ];

        for frame in frames {
            let encoded = frame.encode();
            assert_eq!(Frame::decode(&encoded), Some(frame));
        }
    }

    #[test]
    fn data_frame_layout() {
        let frame = Frame::Data {
            stream_id: 0x01020304,
            payload: Bytes::from_static(b"xy"),
        };
        let encoded = frame.encode();
        assert_eq!(&encoded[..], &[2, 1, 2, 3, 4, b'x', b'y']);
    }

    #[test]
    fn truncated_and_unknown_frames_are_rejected() {
        assert_eq!(Frame::decode(&[]), None);
        assert_eq!(Frame::decode(&[OP_DATA, 0, 0]), None);
        assert_eq!(Frame::decode(&[99, 0, 0, 0, 1]), None);
    }

    #[test]
    fn open_and_close_ignore_payload_bytes() {
        // trailing bytes after the header are tolerated on OPEN/CLOSE
        assert_eq!(
            Frame::decode(&[OP_OPEN, 0, 0, 0, 7, 1, 2, 3]),
            Some(Frame::Open { stream_id: 7 })
        );
    }
}
