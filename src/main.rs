mod calc;
mod db;
mod ipc;
mod ledger;
mod logging;
mod model;
mod queue;
mod scores;
mod terms;

use std::io::{self, Write};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn write_line(out: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(
        out,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = out.flush();
}

/// Queue notifications go out as `{"event", "payload"}` lines.
fn write_events(state: &mut ipc::AppState, out: &mut impl Write) {
    for ev in state.drain_events() {
        match serde_json::to_value(&ev) {
            Ok(v) => write_line(out, &v),
            Err(e) => warn!(error = %e, "dropping unserializable event"),
        }
    }
}

fn handle_line(state: &mut ipc::AppState, line: &str, out: &mut impl Write) {
    let req: ipc::Request = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            // No id to echo back.
            write_line(out, &ipc::bad_json(e.to_string()));
            return;
        }
    };
    let resp = ipc::handle_request(state, req);
    write_events(state, out);
    write_line(out, &resp);
}

async fn sleep_until_due(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending::<()>().await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("gradeledgerd: logging disabled: {e}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "gradeledgerd starting");

    let mut state = ipc::AppState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        let deadline = state.next_flush_deadline();
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    handle_line(&mut state, &line, &mut stdout);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = sleep_until_due(deadline) => {
                state.poll_queue(Instant::now());
                write_events(&mut state, &mut stdout);
            }
        }
    }

    state.teardown(Instant::now());
    write_events(&mut state, &mut stdout);
    info!("gradeledgerd exiting");
}
