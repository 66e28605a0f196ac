//! Lockstep request/reply server.
//!
//! One client at a time. Every frame is handed to the dispatcher and answered
//! before the next one is read; a client that disconnects frees the worker for
//! the next connection, an empty frame stops it.

use futures_util::{SinkExt, StreamExt};
use spworker::dispatch::{Dispatcher, Handler, Reply};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Disconnected,
    Shutdown,
}

/// `u64` little-endian length prefix, then the payload.
pub fn codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(8)
        .little_endian()
        .max_frame_length(max_frame_len)
        .new_codec()
}

/// Accept clients until one of them requests shutdown.
pub async fn serve<H: Handler>(
    listener: TcpListener,
    dispatcher: &mut Dispatcher<H>,
    max_frame_len: usize,
) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);

        match serve_client(stream, dispatcher, max_frame_len).await {
            Ok(Outcome::Shutdown) => {
                let (served, failed) = dispatcher.counts();
                info!(served, failed, "Shutdown requested by {}", addr);
                return Ok(());
            }
            Ok(Outcome::Disconnected) => info!("Client disconnected: {}", addr),
            Err(e) => warn!("Dropped client {}: {}", addr, e),
        }
    }
}

pub async fn serve_client<H: Handler>(
    stream: TcpStream,
    dispatcher: &mut Dispatcher<H>,
    max_frame_len: usize,
) -> std::io::Result<Outcome> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, codec(max_frame_len));

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        debug!(len = frame.len(), "request");
        match dispatcher.handle(&frame) {
            Reply::Send(bytes) => framed.send(Bytes::from(bytes)).await?,
            Reply::Shutdown => return Ok(Outcome::Shutdown),
        }
    }
    Ok(Outcome::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spworker::dispatch::{TAG_EVALUATE, TAG_EXECUTE, TAG_HANDSHAKE};
    use spworker::{ScriptHost, Value};
    use tokio::io::AsyncWriteExt;

    const MAX: usize = 1 << 20;

    fn tagged(tag: u8, text: &str) -> Bytes {
        let mut payload = vec![tag];
        payload.extend_from_slice(text.as_bytes());
        Bytes::from(payload)
    }

    async fn request(client: &mut Framed<TcpStream, LengthDelimitedCodec>, payload: Bytes) -> Vec<u8> {
        client.send(payload).await.unwrap();
        client.next().await.unwrap().unwrap().to_vec()
    }

    async fn spawn_worker() -> (std::net::SocketAddr, tokio::task::JoinHandle<std::io::Result<(u64, u64)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut dispatcher = Dispatcher::new(ScriptHost::new());
            serve(listener, &mut dispatcher, MAX).await?;
            Ok(dispatcher.counts())
        });
        (addr, handle)
    }

    async fn connect(addr: std::net::SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
        Framed::new(TcpStream::connect(addr).await.unwrap(), codec(MAX))
    }

    #[tokio::test]
    async fn session_survives_reconnect_and_stops_on_empty_frame() {
        let (addr, worker) = spawn_worker().await;

        let mut client = connect(addr).await;
        assert_eq!(request(&mut client, tagged(TAG_HANDSHAKE, "")).await, b"connected");
        let reply = request(
            &mut client,
            tagged(TAG_EXECUTE, r#"init("SPMountainCar", 2, {nminds = 2, seed = 3})"#),
        )
        .await;
        assert_eq!(reply, b"nil");
        drop(client);

        // State outlives the connection.
        let mut client = connect(addr).await;
        let reply = request(&mut client, tagged(TAG_EVALUATE, "reset()")).await;
        match spworker::wire::decode_value(&reply).unwrap() {
            Value::Seq(obs) => assert_eq!(obs.len(), 2),
            other => panic!("unexpected reply {other}"),
        }
        let reply = request(&mut client, tagged(TAG_EVALUATE, "no_such_command()")).await;
        assert_eq!(reply, b"nil");

        client.send(Bytes::new()).await.unwrap();
        let (served, failed) = worker.await.unwrap().unwrap();
        assert_eq!((served, failed), (4, 1));
    }

    #[tokio::test]
    async fn oversized_frame_drops_only_that_client() {
        let (addr, worker) = spawn_worker().await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&(MAX as u64 + 1).to_le_bytes()).await.unwrap();
        let mut dropped = Framed::new(raw, codec(MAX));
        assert!(matches!(dropped.next().await, None | Some(Err(_))));

        let mut client = connect(addr).await;
        assert_eq!(request(&mut client, tagged(TAG_HANDSHAKE, "")).await, b"connected");
        client.send(Bytes::new()).await.unwrap();
        worker.await.unwrap().unwrap();
    }
}
