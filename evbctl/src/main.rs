//! Thin CLI control client for `evbd`, analogous to `linnix-cli`: a
//! `clap` subcommand per control verb, translated into one POST to
//! `evbd`'s `/control` endpoint (or a GET for the two read-only verbs).

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "evbctl", version, about)]
struct Args {
    /// Base URL of the evbd control API.
    #[arg(long, default_value = "http://127.0.0.1:9701")]
    url: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Declare that `source-id` arrives on connection `conn`.
    RegisterSource { source_id: u32, conn: u64 },
    /// Mark a source as never sending more data.
    MarkSourceFailed { source_id: u32 },
    /// Mark every source on a connection as never sending more data.
    MarkSocketFailed { conn: u64 },
    /// Undo a prior mark-failed for a connection.
    ReviveSocket { conn: u64 },
    /// Force a complete flush of every queue.
    Flush,
    /// Drop a stalled barrier attempt without waiting for the timeout.
    AbortBarrier,
    /// Begin accepting data for a new run.
    Acquire,
    /// End the current run: flush, then reset timestamps.
    Release,
    /// Stop draining queues without tearing the run down.
    Pause,
    /// Resume draining after a pause.
    Resume,
    /// Shut the engine down.
    End,
    /// Fetch current queue/statistics.
    Statistics,
    /// Fetch out-of-order fragment statistics.
    OutOfOrderStatistics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        CliCommand::Statistics => {
            print_get(&client, &args.url, "/statistics").await
        }
        CliCommand::OutOfOrderStatistics => {
            print_get(&client, &args.url, "/out-of-order-statistics").await
        }
        other => {
            let body = to_control_body(other);
            post_control(&client, &args.url, body).await
        }
    }
}

fn to_control_body(command: CliCommand) -> Value {
    match command {
        CliCommand::RegisterSource { source_id, conn } => {
            json!({ "verb": "register_source", "source_id": source_id, "conn": conn })
        }
        CliCommand::MarkSourceFailed { source_id } => {
            json!({ "verb": "mark_source_failed", "source_id": source_id })
        }
        CliCommand::MarkSocketFailed { conn } => {
            json!({ "verb": "mark_socket_failed", "conn": conn })
        }
        CliCommand::ReviveSocket { conn } => {
            json!({ "verb": "revive_socket", "conn": conn })
        }
        CliCommand::Flush => json!({ "verb": "flush" }),
        CliCommand::AbortBarrier => json!({ "verb": "abort_barrier" }),
        CliCommand::Acquire => json!({ "verb": "acquire" }),
        CliCommand::Release => json!({ "verb": "release" }),
        CliCommand::Pause => json!({ "verb": "pause" }),
        CliCommand::Resume => json!({ "verb": "resume" }),
        CliCommand::End => json!({ "verb": "end" }),
        CliCommand::Statistics | CliCommand::OutOfOrderStatistics => {
            unreachable!("handled via GET before reaching to_control_body")
        }
    }
}

async fn post_control(client: &reqwest::Client, base_url: &str, body: Value) -> anyhow::Result<()> {
    let resp = client
        .post(format!("{base_url}/control"))
        .json(&body)
        .send()
        .await?;
    let text = resp.text().await?;
    println!("{text}");
    Ok(())
}

async fn print_get(client: &reqwest::Client, base_url: &str, path: &str) -> anyhow::Result<()> {
    let resp = client.get(format!("{base_url}{path}")).send().await?;
    let text = resp.text().await?;
    println!("{text}");
    Ok(())
}
