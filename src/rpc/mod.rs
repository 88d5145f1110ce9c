// Read-out HTTP: a small JSON collaborator interface alongside the
// peer wire, exposing the things an operator or block explorer wants
// without speaking the binary protocol. Trimmed down from the
// teacher's JSON-RPC dispatch to the four endpoints the design calls
// for: peer count, per-block info (including per-account state at
// that block), block count, and transaction lookup by id within a block.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;

use crate::node::Node;

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(&body).expect("json always serializes"))))
        .expect("static response is well-formed")
}

fn not_found(what: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, json!({ "error": format!("{what} not found") }))
}

async fn route(node: Arc<Node>, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let query: std::collections::HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| {
            q.split('&')
                .filter_map(|kv| kv.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["peers"] => json_response(StatusCode::OK, json!({ "peer_count": node.peer_count().await })),

        ["blocks"] => json_response(StatusCode::OK, json!({ "block_count": node.block_count().await })),

        ["blocks", number] => {
            let Ok(n) = number.parse::<u64>() else {
                return json_response(StatusCode::BAD_REQUEST, json!({ "error": "block number must be a u64" }));
            };
            match node.get_block(n).await {
                Ok(Some(block)) => {
                    let account = match query.get("account") {
                        Some(addr) => match node.account_at(n, addr).await {
                            Ok(acc) => Some(json!(acc)),
                            Err(e) => return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
                        },
                        None => None,
                    };
                    json_response(StatusCode::OK, json!({ "block": block, "account": account }))
                }
                Ok(None) => not_found("block"),
                Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
            }
        }

        ["blocks", number, "tx", txid] => {
            let Ok(n) = number.parse::<u64>() else {
                return json_response(StatusCode::BAD_REQUEST, json!({ "error": "block number must be a u64" }));
            };
            match node.find_tx_in_block(n, txid).await {
                Ok(Some(tx)) => json_response(StatusCode::OK, json!({ "transaction": tx })),
                Ok(None) => not_found("transaction"),
                Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
            }
        }

        _ => not_found("route"),
    }
}

async fn handle_request(node: Arc<Node>, req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(node, req).await)
}

/// Serves the read-out endpoints on `config.rpc_bind_address:config.rpc_port`
/// until the process exits.
pub async fn serve(node: Arc<Node>) -> crate::error::Result<()> {
    let addr: SocketAddr = format!("{}:{}", node.config.rpc_bind_address, node.config.rpc_port)
        .parse()
        .map_err(|e| crate::error::Error::Config(format!("invalid rpc bind address: {e}")))?;
    let listener = TcpListener::bind(addr).await.map_err(crate::error::Error::Io)?;
    eprintln!("[rpc] listening on {addr}");

    loop {
        let (stream, _) = listener.accept().await.map_err(crate::error::Error::Io)?;
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            let svc = service_fn(move |req| handle_request(Arc::clone(&node), req));
            if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await {
                eprintln!("[rpc] connection error: {e}");
            }
        });
    }
}
