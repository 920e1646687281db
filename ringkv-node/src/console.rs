//! Blocking operator console.
//!
//! A line REPL on stdin/stdout for local `STATUS`, `PUT`, `GET`, and
//! `QUIT`. The command implementations ([`put`], [`get`], [`status`]) are
//! plain functions over [`NodeState`] so the end-to-end tests drive them
//! without a terminal.
//!
//! Lookup answers arrive asynchronously: a remote hit comes back as a
//! `RESULT` message, surfaces on the result channel, and is printed
//! whenever the REPL is next waiting for input.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{info, warn};

use ringkv_proto::id::NodeId;
use ringkv_proto::message::{Envelope, Payload};
use ringkv_proto::net;

use crate::server::{NodeState, ResultEvent};

/// Run the REPL until `q` or end of input, then leave the ring and trigger
/// shutdown.
pub async fn run(
    state: Arc<NodeState>,
    mut results: mpsc::UnboundedReceiver<ResultEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    'repl: loop {
        let local = state.local();
        println!("\n--- node at {local} ---");
        println!("1. Status | 2. PUT | 3. GET | q. Quit");
        print_prompt("> ")?;

        let choice = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break 'repl,
            },
            Some(result) = results.recv() => {
                println!("\n[result] {} = {}", result.key, result.value);
                continue 'repl;
            }
        };

        match choice.trim() {
            "1" => print!("{}", status(&state)),
            "2" => {
                let Some(key) = prompt(&mut lines, "Key: ").await? else {
                    break 'repl;
                };
                let Some(value) = prompt(&mut lines, "Value: ").await? else {
                    break 'repl;
                };
                put(&state, key, value).await;
            }
            "3" => {
                let Some(key) = prompt(&mut lines, "Key: ").await? else {
                    break 'repl;
                };
                match get(&state, key).await {
                    Some(value) => println!("found locally: {value}"),
                    // Either a RESULT arrives on the channel or the lookup
                    // dies on the ring and we simply never print one.
                    None => println!("not here, asking the ring..."),
                }
            }
            "q" => break 'repl,
            "" => continue 'repl,
            other => println!("unknown option: {other}"),
        }
    }

    state.leave().await;
    state.trigger_shutdown();
    Ok(())
}

/// One-screen summary: identity, neighbors, and the full local snapshot.
pub fn status(state: &Arc<NodeState>) -> String {
    let (local, successor, predecessor) = {
        let overlay = state.overlay.lock();
        (
            overlay.local().clone(),
            overlay.successor().clone(),
            overlay.predecessor().cloned(),
        )
    };
    let predecessor = predecessor
        .map(|p| p.addr())
        .unwrap_or_else(|| "None".to_string());
    format!(
        "id: {}\nsuccessor: {}\npredecessor: {}\ndata: {:?}\n",
        local.id,
        successor.addr(),
        predecessor,
        state.store.snapshot(),
    )
}

/// Store a key from the console. As the responsible peer we keep the
/// primary copy and push a replica to the successor; otherwise the write
/// travels along the ring as a plain `PUT` until its owner accepts it.
pub async fn put(state: &Arc<NodeState>, key: String, value: String) {
    let key_hash = NodeId::hash(&key);
    let (local, successor, responsible) = {
        let overlay = state.overlay.lock();
        (
            overlay.local().clone(),
            overlay.successor().clone(),
            overlay.is_responsible(&key_hash),
        )
    };

    if responsible {
        state.store.put(key.clone(), value.clone());
        info!(%key, "stored locally as primary");
        if successor.id != local.id {
            let msg = Envelope::new(
                local.id.clone(),
                Payload::Put { key, value, is_replica: true },
            );
            if let Err(e) = net::send_envelope(&successor.ip, successor.port, &msg).await {
                warn!(peer = %successor, "replica write failed: {e}");
            }
        }
    } else {
        let msg = Envelope::new(
            local.id.clone(),
            Payload::Put { key, value, is_replica: false },
        );
        if let Err(e) = net::send_envelope(&successor.ip, successor.port, &msg).await {
            warn!(peer = %successor, "forwarded write failed: {e}");
        }
    }
}

/// Look a key up from the console. A local hit returns immediately; a miss
/// sends a `GET` along the ring with this peer as requester and returns
/// `None`; the answer, if any, arrives as a [`ResultEvent`].
pub async fn get(state: &Arc<NodeState>, key: String) -> Option<String> {
    if let Some(value) = state.store.get(&key) {
        return Some(value);
    }
    let (local, successor) = {
        let overlay = state.overlay.lock();
        (overlay.local().clone(), overlay.successor().clone())
    };
    let msg = Envelope::new(
        local.id.clone(),
        Payload::Get {
            key,
            requester_ip: local.ip.clone(),
            requester_port: local.port,
        },
    );
    if let Err(e) = net::send_envelope(&successor.ip, successor.port, &msg).await {
        warn!(peer = %successor, "lookup send failed: {e}");
    }
    None
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    print_prompt(label)?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

fn print_prompt(label: &str) -> Result<()> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(())
}
