// corechain-cli — local commands that don't need a running node:
// stand up a fresh chain from a genesis declaration, or generate an
// account key pair. Talking to a live `cnode` over the read-out HTTP
// interface is left to whatever HTTP client the operator prefers.
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use colored::*;
use corechain::chain::Chain;
use corechain::config::Config;
use corechain::genesis;
use corechain::primitives::GenesisDeclaration;
use corechain::state::WorldState;
use corechain::wallet;

const GENESIS_MAX_ROUNDS: u64 = 10_000_000;

fn print_usage() {
    println!("{}", "corechain-cli".bright_cyan().bold());
    println!();
    println!("  {} initc --genesis <file> --config <file>", "❯".bright_black());
    println!("      {}", "builds the chain store from a genesis declaration".white());
    println!("  {} create-account --key-dir <dir>", "❯".bright_black());
    println!("      {}", "generates an RSA-PSS key pair under <dir>".white());
}

fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned()
}

fn cmd_initc(args: &[String]) -> ExitCode {
    let Some(genesis_path) = flag(args, "--genesis") else {
        eprintln!("{} --genesis <file> is required", "[initc]".bright_red().bold());
        return ExitCode::FAILURE;
    };
    let Some(config_path) = flag(args, "--config") else {
        eprintln!("{} --config <file> is required", "[initc]".bright_red().bold());
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&PathBuf::from(config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    let decl_raw = match std::fs::read_to_string(&genesis_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} reading {genesis_path}: {e}", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };
    let decl: GenesisDeclaration = match serde_json::from_str(&decl_raw) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{} parsing {genesis_path}: {e}", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    let account = match wallet::load_account(&config.key_dir) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{} {e} (run create-account first)", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    let mut chain = match Chain::load(&config.chain_db) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };
    if chain.is_initialized() {
        eprintln!("{} chain at {:?} is already initialised", "[initc]".bright_red().bold(), config.chain_db);
        return ExitCode::FAILURE;
    }
    let mut state = match WorldState::open(&config.state_db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} {e}", "[initc]".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    match genesis::bootstrap(decl, account.address.clone(), timestamp, GENESIS_MAX_ROUNDS, &mut state, &mut chain) {
        Ok(block) => {
            println!("{} genesis block mined: {}", "[initc]".bright_green().bold(), block.id);
            println!("{} coinbase: {}", "[initc]".bright_green().bold(), account.address);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {e}", "[initc]".bright_red().bold());
            ExitCode::FAILURE
        }
    }
}

fn cmd_create_account(args: &[String]) -> ExitCode {
    let Some(key_dir) = flag(args, "--key-dir") else {
        eprintln!("{} --key-dir <dir> is required", "[create-account]".bright_red().bold());
        return ExitCode::FAILURE;
    };
    match wallet::create_account(&PathBuf::from(&key_dir)) {
        Ok(account) => {
            println!("{} address: {}", "[create-account]".bright_green().bold(), account.address);
            println!("{} key pair written under {key_dir}", "[create-account]".bright_green().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {e}", "[create-account]".bright_red().bold());
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("initc") => cmd_initc(&args[2..]),
        Some("create-account") => cmd_create_account(&args[2..]),
        _ => {
            print_usage();
            ExitCode::FAILURE
        }
    }
}
