//! Per-connection upgrade and session wiring.
//!
//! # Responsibilities
//! - Run the websocket handshake on each accepted TCP stream
//! - Construct and register the session, then hand it to the caller
//! - Pump frames between the socket and the session's byte channels
//! - Tear the session down exactly once, whichever side closes first

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::net::{SessionHandle, SessionPermit, SessionRegistry};
use crate::observability::metrics;
use crate::ws::SessionHandler;

/// Upgrade one accepted connection and, on success, register and deliver
/// the resulting session.
///
/// Failures here are local to the connection: the stream is dropped, the
/// failure is logged and counted, and nothing reaches the lifecycle layer.
pub(crate) async fn initialize(
    stream: TcpStream,
    peer: SocketAddr,
    permit: SessionPermit,
    registry: Arc<SessionRegistry>,
    handler: SessionHandler,
    handshake_timeout: Duration,
) {
    let ws = match tokio::time::timeout(
        handshake_timeout,
        tokio_tungstenite::accept_async(stream),
    )
    .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(peer_addr = %peer, error = %e, "Handshake failed");
            metrics::handshake_failed();
            return;
        }
        Err(_) => {
            tracing::debug!(peer_addr = %peer, timeout = ?handshake_timeout, "Handshake timed out");
            metrics::handshake_failed();
            return;
        }
    };

    let (handle, session, pipes) = SessionHandle::channel(peer);
    let id = handle.id();

    // Register before the handler can observe the session, so a drain that
    // starts concurrently is guaranteed to close it.
    registry.add(Arc::clone(&handle));
    metrics::session_opened();

    tracing::info!(session = %id, peer_addr = %peer, "Session upgraded");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(writer_loop(sink, pipes.outbound_rx, Arc::clone(&handle)));
    let reader = tokio::spawn(reader_loop(stream, pipes.input_tx, Arc::clone(&handle)));

    // Teardown supervisor: the single owner of deregistration and the
    // closed signal. Runs once per session by construction.
    {
        let registry = Arc::clone(&registry);
        let closed_tx = pipes.closed_tx;
        tokio::spawn(async move {
            let _ = reader.await;
            let _ = writer.await;
            registry.remove(&id);
            let _ = closed_tx.send(true);
            metrics::session_closed();
            tracing::info!(session = %id, "Session closed");
            drop(permit);
        });
    }

    handler(session);
}

/// Pump inbound frames into the session's input channel.
///
/// Exits on remote close, transport error, or a close request from our
/// side; always leaves the close latch set so the writer follows.
async fn reader_loop(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    input_tx: mpsc::Sender<Bytes>,
    handle: Arc<SessionHandle>,
) {
    let mut close_rx = handle.close_signal();
    loop {
        tokio::select! {
            _ = close_requested(&mut close_rx) => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    if !deliver(&input_tx, &mut close_rx, data).await {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !deliver(&input_tx, &mut close_rx, Bytes::from(text)).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!(session = %handle.id(), "Peer closed");
                    break;
                }
                // Ping/pong are handled by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = %handle.id(), error = %e, "Read failed");
                    break;
                }
                None => break,
            }
        }
    }
    handle.close();
}

/// Forward one payload to the handler, bailing out if a close request
/// arrives while the input buffer is full.
///
/// Returns `false` when the session should stop reading. A handler that has
/// dropped its receiver simply discards input; the session stays open until
/// a peer or the server closes it.
async fn deliver(
    input_tx: &mpsc::Sender<Bytes>,
    close_rx: &mut watch::Receiver<bool>,
    data: Bytes,
) -> bool {
    tokio::select! {
        _ = close_requested(close_rx) => false,
        result = input_tx.send(data) => {
            let _ = result;
            true
        }
    }
}

/// Pump queued outbound bytes to the socket as binary frames.
///
/// On a close request: flush whatever is already queued, send a going-away
/// close frame, and shut the sink down.
async fn writer_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    handle: Arc<SessionHandle>,
) {
    let mut close_rx = handle.close_signal();
    loop {
        tokio::select! {
            _ = close_requested(&mut close_rx) => {
                while let Ok(data) = outbound_rx.try_recv() {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "server closing".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
            data = outbound_rx.recv() => match data {
                Some(data) => {
                    if let Err(e) = sink.send(Message::Binary(data)).await {
                        tracing::debug!(session = %handle.id(), error = %e, "Write failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = sink.close().await;
    // Ensure the reader follows whichever half ended first.
    handle.close();
}

async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|requested| *requested).await;
}
