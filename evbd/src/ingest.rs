//! Minimal TCP framer standing in for the hardware-readout transport:
//! accepts connections, forwards raw byte blocks to the fragment handler
//! thread, and deregisters the connection's sources on disconnect.
//!
//! Grounded on the teacher's `runtime::stream_listener::start_listener`
//! pattern of running a blocking read loop on `spawn_blocking` and
//! dispatching each read asynchronously, adapted here to a real TCP
//! socket instead of a BPF ring buffer.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use bytes::Bytes;
use evb_core::ConnId;
use log::{info, warn};
use tokio::net::TcpListener;

use crate::engine_thread::EngineMsg;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub async fn run(listen: std::net::SocketAddr, engine_tx: SyncSender<EngineMsg>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("listening for fragment producers on {listen}");

    loop {
        let (stream, peer) = listener.accept().await?;
        let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        info!("accepted connection {conn} from {peer}");

        let std_stream = stream.into_std()?;
        std_stream.set_nonblocking(false)?;
        let engine_tx = engine_tx.clone();

        tokio::task::spawn_blocking(move || read_loop(conn, std_stream, engine_tx));
    }
}

fn read_loop(conn: ConnId, mut stream: std::net::TcpStream, engine_tx: SyncSender<EngineMsg>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                if engine_tx.send(EngineMsg::Block { conn, data }).is_err() {
                    warn!("engine thread gone; connection {conn} reader exiting");
                    break;
                }
            }
            Err(e) => {
                warn!("connection {conn} read error: {e}");
                break;
            }
        }
    }
    let _ = engine_tx.send(EngineMsg::SocketFailed(conn));
}

pub fn new_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}
