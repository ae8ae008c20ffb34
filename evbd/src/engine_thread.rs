//! Wires a [`FragmentHandler`] to a single dedicated OS thread: the only
//! thread that ever touches it, per the single-writer model. Async I/O
//! (ingestion, the control API) hands work in over a bounded channel
//! rather than reaching into engine state directly.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use evb_core::{Command, ConnId, Engine, EngineConfig, EngineStats, FragmentHandler, ObserverRegistry, Response, SortBatch};
use log::warn;

pub enum EngineMsg {
    Block { conn: ConnId, data: Bytes },
    SocketFailed(ConnId),
    Command(Command, SyncSender<Response>),
}

pub fn spawn(
    config: EngineConfig,
    observers: Arc<ObserverRegistry>,
    stats: Arc<EngineStats>,
    out_tx: SyncSender<SortBatch>,
) -> (JoinHandle<()>, SyncSender<EngineMsg>) {
    let idle_poll_period = config.idle_poll_period;
    let (tx, rx) = sync_channel::<EngineMsg>(1024);

    let handle = std::thread::Builder::new()
        .name("evb-fragment-handler".into())
        .spawn(move || run(config, observers, stats, out_tx, rx, idle_poll_period))
        .expect("failed to spawn fragment handler thread");

    (handle, tx)
}

fn run(
    config: EngineConfig,
    observers: Arc<ObserverRegistry>,
    stats: Arc<EngineStats>,
    out_tx: SyncSender<SortBatch>,
    msg_rx: Receiver<EngineMsg>,
    idle_poll_period: std::time::Duration,
) {
    let handler = FragmentHandler::new(config, observers, stats, out_tx);
    let mut engine = Engine::new(handler);

    loop {
        match msg_rx.recv_timeout(idle_poll_period) {
            Ok(EngineMsg::Block { conn, data }) => {
                // A paused engine still accepts and queues data; it just
                // relies on idle_poll never draining it until resumed,
                // since FragmentHandler has no separate queue-only entry
                // point distinct from add_block's own flush pass.
                if let Err(e) = engine.handler.add_block(conn, &data) {
                    warn!("dropping malformed block from connection {conn}: {e}");
                }
            }
            Ok(EngineMsg::SocketFailed(conn)) => {
                engine.handler.drop_socket(conn);
            }
            Ok(EngineMsg::Command(command, reply)) => {
                let response = engine.apply(command);
                let _ = reply.send(response);
            }
            Err(RecvTimeoutError::Timeout) => {
                if engine.is_draining() {
                    engine.handler.idle_poll();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                engine.handler.flush();
                break;
            }
        }
    }
}
