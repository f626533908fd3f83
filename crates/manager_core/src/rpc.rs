//! Length-delimited JSON-RPC server the fuzzer instances connect to. No
//! framing crate appears anywhere in the retrieved pack, so the wire format
//! is the simplest thing that is still unambiguous: a big-endian `u32`
//! byte length followed by that many bytes of `serde_json`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::corpus::{CorpusEngine, RpcInput};
use crate::error::RpcError;

const MAX_MESSAGE_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "Method", content = "Args")]
enum RpcRequest {
    Connect { name: String },
    NewInput { name: String, input: RpcInput },
    Poll { name: String, stats: FxHashMap<String, u64> },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RpcResponse {
    Connect { prios: Vec<Vec<f32>>, enabled_calls: String },
    NewInput { accepted: bool },
    Poll { new_inputs: Vec<RpcInput>, candidates: Vec<Vec<u8>> },
}

async fn read_message(stream: &mut TcpStream) -> Result<Vec<u8>, RpcError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(RpcError::Eof),
        Err(e) => return Err(RpcError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf).min(MAX_MESSAGE_BYTES);
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_message(stream: &mut TcpStream, body: &[u8]) -> Result<(), RpcError> {
    let len = u32::try_from(body.len()).unwrap_or(MAX_MESSAGE_BYTES);
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&body[..len as usize]).await?;
    Ok(())
}

/// Accepts connections on `addr` until `shutdown` is set, spawning one task
/// per connection. Each connection is its own independent request/response
/// loop; the engine's mutex is what actually serializes corpus mutation.
pub async fn serve(
    addr: &str,
    engine: Arc<CorpusEngine>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), RpcError> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("rpc server: listening on {addr}");

    while !shutdown.load(Ordering::Relaxed) {
        let accepted = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            listener.accept(),
        )
        .await;
        let (stream, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                log::warn!("rpc server: accept failed: {e}");
                continue;
            }
            Err(_timeout) => continue,
        };
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, engine).await {
                log::debug!("rpc server: connection from {peer} ended: {e}");
            }
        });
    }
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, engine: Arc<CorpusEngine>) -> Result<(), RpcError> {
    loop {
        let body = match read_message(&mut stream).await {
            Ok(body) => body,
            Err(RpcError::Eof) => return Ok(()),
            Err(e) => return Err(e),
        };
        let request: RpcRequest = serde_json::from_slice(&body)?;
        let response = dispatch(&engine, request);
        let encoded = serde_json::to_vec(&response)?;
        write_message(&mut stream, &encoded).await?;
    }
}

fn dispatch(engine: &CorpusEngine, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::Connect { name } => {
            let (prios, enabled_calls) = engine.connect(&name);
            RpcResponse::Connect { prios, enabled_calls }
        }
        RpcRequest::NewInput { input, .. } => {
            let accepted = engine.accept_input(input);
            RpcResponse::NewInput { accepted }
        }
        RpcRequest::Poll { name, stats } => {
            // An unknown fuzzer name here is a programmer error (the fuzzer
            // must `Connect` before it `Poll`s), not a client-recoverable
            // condition; per the manager's error taxonomy this is fatal.
            let (new_inputs, candidates) = engine
                .fuzzer_poll(&name, &stats)
                .unwrap_or_else(|e| panic!("{e}"));
            RpcResponse::Poll { new_inputs, candidates }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_table::CallTable;
    use crate::external::{LineProgramDeserializer, UniformPriorityModel};
    use crate::store::PersistentStore;
    use manager_bolts::Cover;

    fn test_engine() -> (Arc<CorpusEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = PersistentStore::open(dir.path(), |_| true).unwrap();
        let all = vec!["read".to_string()];
        let enabled: rustc_hash::FxHashSet<String> = all.iter().cloned().collect();
        let calls = CallTable::new(&all, &enabled);
        let engine = CorpusEngine::new(
            store,
            calls,
            true,
            Arc::new(LineProgramDeserializer),
            Arc::new(UniformPriorityModel),
        );
        (Arc::new(engine), dir)
    }

    #[tokio::test]
    async fn round_trips_connect_new_input_and_poll_over_the_wire() {
        let (engine, _dir) = test_engine();
        let shutdown = Arc::new(AtomicBool::new(false));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let addr_string = addr.to_string();

        let server_engine = Arc::clone(&engine);
        let server_shutdown = Arc::clone(&shutdown);
        let server_addr = addr_string.clone();
        let server = tokio::spawn(async move {
            serve(&server_addr, server_engine, server_shutdown).await
        });

        // Give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(&addr_string).await.unwrap();

        let connect_req = serde_json::to_vec(&serde_json::json!({
            "Method": "Connect",
            "Args": { "name": "fuzzer-1" },
        }))
        .unwrap();
        write_message(&mut client, &connect_req).await.unwrap();
        let response = read_message(&mut client).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert!(parsed.get("enabled_calls").is_some());

        let mut cover = Cover::new();
        cover.insert(42);
        let new_input_req = serde_json::to_vec(&serde_json::json!({
            "Method": "NewInput",
            "Args": { "name": "fuzzer-1", "input": { "Call": "read", "Prog": [1,2,3], "Cover": cover } },
        }))
        .unwrap();
        write_message(&mut client, &new_input_req).await.unwrap();
        let response = read_message(&mut client).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(parsed["accepted"], true);

        shutdown.store(true, Ordering::Relaxed);
        drop(client);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), server).await;
    }
}
