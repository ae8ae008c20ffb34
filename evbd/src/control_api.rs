//! The control/status HTTP surface, implemented as a thin translation
//! over `evb_core::control::Command` so verb semantics live in one place.
//! Grounded on `cognitod`'s `api`/`routes` module shape (an `AppState`
//! shared via `axum::extract::State`, JSON in and out).

use std::sync::mpsc::{sync_channel, SyncSender};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use evb_core::{Command, Response};
use serde::{Deserialize, Serialize};

use crate::dto::{InputStatisticsDto, OutOfOrderStatisticsDto};
use crate::engine_thread::EngineMsg;

#[derive(Clone)]
pub struct AppState {
    pub engine_tx: SyncSender<EngineMsg>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/control", post(control))
        .route("/statistics", get(statistics))
        .route("/out-of-order-statistics", get(out_of_order_statistics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
enum ControlRequest {
    RegisterSource { source_id: u32, conn: u64 },
    MarkSourceFailed { source_id: u32 },
    MarkSocketFailed { conn: u64 },
    ReviveSocket { conn: u64 },
    Flush,
    AbortBarrier,
    Acquire,
    Release,
    Pause,
    Resume,
    End,
}

impl From<ControlRequest> for Command {
    fn from(req: ControlRequest) -> Command {
        match req {
            ControlRequest::RegisterSource { source_id, conn } => {
                Command::RegisterSource { source_id, conn }
            }
            ControlRequest::MarkSourceFailed { source_id } => Command::MarkSourceFailed { source_id },
            ControlRequest::MarkSocketFailed { conn } => Command::MarkSocketFailed { conn },
            ControlRequest::ReviveSocket { conn } => Command::ReviveSocket { conn },
            ControlRequest::Flush => Command::Flush,
            ControlRequest::AbortBarrier => Command::AbortBarrier,
            ControlRequest::Acquire => Command::Acquire,
            ControlRequest::Release => Command::Release,
            ControlRequest::Pause => Command::Pause,
            ControlRequest::Resume => Command::Resume,
            ControlRequest::End => Command::End,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ControlReply {
    Ok,
    Error { message: String },
}

async fn control(State(state): State<AppState>, Json(req): Json<ControlRequest>) -> Json<ControlReply> {
    let (reply_tx, reply_rx) = sync_channel(1);
    let command = req.into();
    if state
        .engine_tx
        .send(EngineMsg::Command(command, reply_tx))
        .is_err()
    {
        return Json(ControlReply::Error {
            message: "engine thread is not running".into(),
        });
    }
    match reply_rx.recv() {
        Ok(Response::Ack) => Json(ControlReply::Ok),
        Ok(_) => Json(ControlReply::Ok),
        Err(_) => Json(ControlReply::Error {
            message: "engine thread dropped the reply channel".into(),
        }),
    }
}

async fn statistics(State(state): State<AppState>) -> Json<InputStatisticsDto> {
    let (reply_tx, reply_rx) = sync_channel(1);
    let _ = state
        .engine_tx
        .send(EngineMsg::Command(Command::Statistics, reply_tx));
    match reply_rx.recv() {
        Ok(Response::Statistics(stats)) => Json((&stats).into()),
        _ => Json(InputStatisticsDto {
            total_fragments_queued: 0,
            oldest_timestamp: 0,
            newest_timestamp: 0,
            queues: Vec::new(),
        }),
    }
}

async fn out_of_order_statistics(State(state): State<AppState>) -> Json<OutOfOrderStatisticsDto> {
    let (reply_tx, reply_rx) = sync_channel(1);
    let _ = state
        .engine_tx
        .send(EngineMsg::Command(Command::OutOfOrderStatistics, reply_tx));
    match reply_rx.recv() {
        Ok(Response::OutOfOrderStatistics(stats)) => Json((&stats).into()),
        _ => Json(OutOfOrderStatisticsDto::default()),
    }
}
