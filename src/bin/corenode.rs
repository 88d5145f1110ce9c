// cnode — runs a permissioned node: boots from a config file, loads
// the account key pair, opens the chain/state stores, and serves both
// the peer wire and the read-out HTTP endpoints until killed.
use std::path::PathBuf;
use std::process::ExitCode;

use colored::*;
use corechain::config::Config;
use corechain::node::{Node, NodeType};
use corechain::wallet;

fn banner() {
    println!("{}", " CORECHAIN NODE ".on_blue().bright_white().bold());
    println!("{}", " permissioned proof-of-work chain".bright_black());
    println!();
}

struct Args {
    port: Option<u16>,
    node_type: NodeType,
    config: PathBuf,
}

fn parse_args() -> Result<Args, String> {
    let mut port = None;
    let mut node_type = NodeType::Basic;
    let mut config = None;

    let raw: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--port" => {
                i += 1;
                port = Some(raw.get(i).ok_or("--port requires a value")?.parse::<u16>().map_err(|e| e.to_string())?);
            }
            "--node_type" => {
                i += 1;
                node_type = match raw.get(i).map(String::as_str) {
                    Some("basic") => NodeType::Basic,
                    Some("validator") => NodeType::Validator,
                    other => return Err(format!("--node_type must be 'basic' or 'validator', got {other:?}")),
                };
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(raw.get(i).ok_or("--config requires a value")?));
            }
            other => return Err(format!("unrecognised argument: {other}")),
        }
        i += 1;
    }

    Ok(Args { port, node_type, config: config.ok_or("--config <file> is required")? })
}

#[tokio::main]
async fn main() -> ExitCode {
    banner();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{} {e}", "[init]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} could not load config: {e}", "[init]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.p2p_port = port;
    }

    let account = match wallet::load_account(&config.key_dir) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{} {e}", "[init]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };
    println!("{} account: {}", "[init]".bright_blue().bold(), account.address);

    let node = match Node::open(config, account, args.node_type) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("{} {e}", "[init]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };
    println!("{} chain height: {}", "[init]".bright_blue().bold(), node.block_count().await);

    let rpc_node = std::sync::Arc::clone(&node);
    tokio::spawn(async move {
        if let Err(e) = corechain::rpc::serve(rpc_node).await {
            eprintln!("{} {e}", "[rpc]".bright_red().bold());
        }
    });

    if let Err(e) = node.run(&[]).await {
        eprintln!("{} {e}", "[node]".bright_red().bold());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
