// Node: the event loop that ties chain, state, mempool, and the peer
// wire together. One node instance owns its chain/state stores and is
// driven entirely from this loop — connection tasks only ever reach
// the stores through `Inner`'s lock, never directly.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::chain::Chain;
use crate::codec::Message;
use crate::config::Config;
use crate::crypto::keys::Address;
use crate::error::{Error, NetworkError, NodeError};
use crate::mempool::Mempool;
use crate::net::FramedStream;
use crate::primitives::Block;
use crate::state::WorldState;
use crate::wallet::Account;

const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const LEADER_ELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const TICK_INTERVAL: Duration = Duration::from_secs(2);
const MAX_MINE_ROUNDS: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Basic,
    Validator,
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Everything a connection task needs to reach into the store. Kept
/// behind a single lock — the model is single-threaded cooperative,
/// this is just how that's expressed on top of tokio tasks.
struct Inner {
    chain: Chain,
    state: WorldState,
    mempool: Mempool,
    ready_to_mine: bool,
    last_block_ts: u64,
    leader: Option<Address>,
    am_leader: bool,
}

struct PeerHandle {
    address: Option<Address>,
    sender: mpsc::UnboundedSender<Message>,
}

/// Tracks in-flight request/response pairs by `request_id`, with a
/// per-request timeout. Each entry remembers which peer it targets so
/// a dropped connection can discard every entry aimed at it; a late
/// response for a discarded id then has nothing left to complete.
#[derive(Default)]
struct PendingRequests {
    counter: AtomicU64,
    table: Mutex<HashMap<u64, (SocketAddr, oneshot::Sender<Message>)>>,
}

impl PendingRequests {
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn wait(&self, id: u64, peer: SocketAddr, timeout: Duration) -> crate::error::Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.table.lock().await.insert(id, (peer, tx));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            _ => {
                self.table.lock().await.remove(&id);
                Err(NetworkError::Timeout { request_id: id, peer: peer.to_string() }.into())
            }
        }
    }

    async fn complete(&self, id: u64, msg: Message) {
        if let Some((_, tx)) = self.table.lock().await.remove(&id) {
            let _ = tx.send(msg);
        }
    }

    async fn discard_for_peer(&self, peer: SocketAddr) {
        self.table.lock().await.retain(|_, (addr, _)| *addr != peer);
    }
}

pub struct Node {
    pub config: Config,
    pub account: Account,
    pub node_type: NodeType,
    inner: Mutex<Inner>,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
    requests: PendingRequests,
    broadcast_tx: broadcast::Sender<Message>,
}

impl Node {
    /// Opens the chain and state stores under the resolved config
    /// paths. `GenesisMissing` here is fatal per the propagation
    /// policy — the caller (the `cnode` binary) exits on it.
    pub fn open(config: Config, account: Account, node_type: NodeType) -> crate::error::Result<Arc<Node>> {
        let chain = Chain::load(&config.chain_db)?;
        if !chain.is_initialized() {
            return Err(NodeError::GenesisMissing.into());
        }
        let state = WorldState::open(&config.state_db)?;
        let (broadcast_tx, _) = broadcast::channel(256);
        let last_block_ts = chain.head().map(|b| b.timestamp).unwrap_or(0);
        Ok(Arc::new(Node {
            config,
            account,
            node_type,
            inner: Mutex::new(Inner {
                chain,
                state,
                mempool: Mempool::new(),
                ready_to_mine: true,
                last_block_ts,
                leader: None,
                am_leader: false,
            }),
            peers: Mutex::new(HashMap::new()),
            requests: PendingRequests::default(),
            broadcast_tx,
        }))
    }

    /// Runs the node: accepts inbound peers, dials any configured
    /// seeds, and drives sync, leader election, and block production
    /// concurrently on the same event loop.
    pub async fn run(self: Arc<Self>, seeds: &[SocketAddr]) -> crate::error::Result<()> {
        let bind = format!("{}:{}", self.config.p2p_bind_address, self.config.p2p_port);
        let listener = TcpListener::bind(&bind).await.map_err(Error::Io)?;
        eprintln!("[node] listening on {bind}");

        for &seed in seeds {
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                match TcpStream::connect(seed).await {
                    Ok(stream) => node.spawn_connection(stream, seed, true),
                    Err(e) => eprintln!("[node] could not connect to seed {seed}: {e}"),
                }
            });
        }

        {
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = node.sync().await {
                    eprintln!("[sync] boot-time sync failed: {e}");
                }
                eprintln!("[node] boot -> ready");
            });
        }

        if matches!(self.node_type, NodeType::Validator) {
            let node = Arc::clone(&self);
            tokio::spawn(node.miner_loop());
        }

        loop {
            let (stream, addr) = listener.accept().await.map_err(Error::Io)?;
            Arc::clone(&self).spawn_connection(stream, addr, false);
        }
    }

    fn spawn_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, is_outbound: bool) {
        tokio::spawn(async move {
            if let Err(e) = self.handle_connection(stream, addr, is_outbound).await {
                eprintln!("[node] {addr} disconnected: {e}");
            }
        });
    }

    // ---- boot-time sync (spec 4.8) ----------------------------------

    async fn sync(&self) -> crate::error::Result<()> {
        let my_height = self.inner.lock().await.chain.height();
        let targets: Vec<SocketAddr> = self.peers.lock().await.keys().copied().collect();
        if targets.is_empty() {
            return Ok(());
        }

        let mut best: Option<(u64, Address, SocketAddr)> = None;
        for addr in targets {
            let request_id = self.requests.next_id();
            if self.send_to(addr, Message::Rbh { my_height, request_id }).await.is_err() {
                continue;
            }
            match self.requests.wait(request_id, addr, REQUEST_TIMEOUT).await {
                Ok(Message::Blh { height, address, .. }) if height > my_height => {
                    if best.as_ref().map(|(h, _, _)| height > *h).unwrap_or(true) {
                        best = Some((height, address, addr));
                    }
                }
                Ok(_) => {}
                Err(e) => eprintln!("[sync] {addr} timed out: {e}"),
            }
        }

        let Some((_, _leader_addr, peer_addr)) = best else { return Ok(()) };

        let request_id = self.requests.next_id();
        let start_from = my_height + 1;
        self.send_to(peer_addr, Message::Rbl { start_from, request_id }).await?;
        let reply = self.requests.wait(request_id, peer_addr, REQUEST_TIMEOUT).await?;
        let Message::Abl { blocks, .. } = reply else { return Ok(()) };

        for block in blocks {
            let number = block.number;
            if let Err(e) = self.apply_block_locked(block).await {
                eprintln!("[sync] stopped applying at block {number}: {e}");
                break;
            }
        }
        Ok(())
    }

    // ---- transaction / block admission ------------------------------

    pub async fn receive_transaction(&self, tx: crate::primitives::Transaction) -> crate::error::Result<()> {
        tx.verify()?;
        let _ = self.broadcast_tx.send(Message::Txn(tx.clone()));
        {
            let mut inner = self.inner.lock().await;
            inner.mempool.add(tx);
        }
        if matches!(self.node_type, NodeType::Validator) {
            self.try_mine_once().await;
        }
        Ok(())
    }

    pub async fn receive_block(&self, block: Block) -> crate::error::Result<()> {
        self.apply_block_locked(block).await
    }

    async fn apply_block_locked(&self, block: Block) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        let Inner { chain, state, mempool, ready_to_mine, last_block_ts, .. } = &mut *inner;
        let mut adopted_body = Vec::new();
        let mut adopted_ts = *last_block_ts;
        chain.apply_block(block, state, |head| {
            adopted_body = head.body.clone();
            adopted_ts = head.timestamp;
        })?;
        *mempool = mempool.diff(&adopted_body);
        *ready_to_mine = true;
        *last_block_ts = adopted_ts;
        Ok(())
    }

    // ---- read-out accessors (used by the HTTP collaborator) --------

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn block_count(&self) -> u64 {
        self.inner.lock().await.chain.height()
    }

    pub async fn get_block(&self, number: u64) -> crate::error::Result<Option<Block>> {
        self.inner.lock().await.chain.get_block(number)
    }

    /// Looks up an account's balance/nonce *as of* `height`, by reading
    /// the worldstate snapshot stored for that block.
    pub async fn account_at(&self, height: u64, address: &str) -> crate::error::Result<Option<crate::state::AccountState>> {
        let mut inner = self.inner.lock().await;
        let mut shadow = inner.state.candidate_state(height);
        shadow.account_state(address, false)
    }

    pub async fn find_tx_in_block(&self, number: u64, txid: &str) -> crate::error::Result<Option<crate::primitives::Transaction>> {
        let block = self.get_block(number).await?;
        Ok(block.and_then(|b| b.body.into_iter().find(|tx| tx.id == txid)))
    }

    // ---- leader election (spec 4.8 miner sub-FSM) -------------------

    async fn miner_loop(self: Arc<Self>) {
        self.elect_leader().await;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            let am_leader = self.inner.lock().await.am_leader;
            if am_leader {
                if let Err(e) = self.production_tick().await {
                    eprintln!("[miner] tick failed: {e}");
                }
            }
        }
    }

    async fn elect_leader(&self) {
        let Some(genesis) = self.inner.lock().await.chain.genesis.clone() else { return };
        let mut candidates = vec![self.account.address.clone()];

        let miner_peers: Vec<SocketAddr> = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .filter(|(_, h)| h.address.as_ref().map(|a| genesis.miners.contains(a)).unwrap_or(false))
                .map(|(addr, _)| *addr)
                .collect()
        };

        for addr in miner_peers {
            let request_id = self.requests.next_id();
            if self
                .send_to(addr, Message::Lrq { my_address: self.account.address.clone(), request_id })
                .await
                .is_err()
            {
                continue;
            }
            if let Ok(Message::Lrs { its_address, .. }) = self.requests.wait(request_id, addr, LEADER_ELECTION_TIMEOUT).await {
                candidates.push(its_address);
            }
        }

        let leader = candidates.into_iter().max().unwrap_or_else(|| self.account.address.clone());
        let am_leader = leader == self.account.address;
        {
            let mut inner = self.inner.lock().await;
            inner.leader = Some(leader.clone());
            inner.am_leader = am_leader;
        }
        if am_leader {
            eprintln!("[miner] elected leader ({})", self.account.address);
        } else {
            eprintln!("[miner] yielding leadership to {leader}");
        }
    }

    /// Called when a peer connection that belonged to the current
    /// leader is dropped, or when an `LRQ` from a higher address
    /// arrives while leading — both trigger re-election.
    async fn yield_and_reelect(self: Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.am_leader = false;
        }
        self.elect_leader().await;
    }

    async fn try_mine_once(&self) {
        let am_leader = self.inner.lock().await.am_leader;
        if am_leader {
            if let Err(e) = self.production_tick().await {
                eprintln!("[miner] tick failed: {e}");
            }
        }
    }

    /// Spec 4.8 block production tick, steps 1-4.
    async fn production_tick(&self) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.ready_to_mine {
            return Ok(());
        }
        let Some(genesis) = inner.chain.genesis.clone() else { return Ok(()) };
        let mempool_len = inner.mempool.len();
        let block_ready = mempool_len >= genesis.block_mining.min_bound
            || now().saturating_sub(inner.last_block_ts) >= genesis.block_mining.interval;
        if !block_ready {
            return Ok(());
        }

        let snapshot = inner.mempool.peek(genesis.block_mining.max_bound);
        let mut shadow_state = inner.state.candidate_state(inner.chain.height());

        let candidate = inner.chain.create_candidate_block(self.account.address.clone(), now())?;
        shadow_state.new_block(candidate.number)?;

        let mut accepted = Vec::new();
        for tx in snapshot {
            if shadow_state.apply_txn(&tx).is_ok() {
                accepted.push(tx);
            }
        }
        if accepted.is_empty() && !genesis.block_mining.allow_empty {
            return Ok(());
        }
        let _ = shadow_state.incr_balance(&candidate.coinbase, candidate.reward);
        let state_hash = shadow_state.commit()?;

        let sealed = Block::candidate(
            candidate.number,
            candidate.parent_hash,
            state_hash,
            accepted,
            candidate.coinbase,
            candidate.data,
            now(),
            candidate.reward,
            candidate.difficulty,
        );
        inner.ready_to_mine = false;
        let mined = match inner.chain.mine(sealed, MAX_MINE_ROUNDS) {
            Ok(b) => b,
            Err(e) => {
                inner.ready_to_mine = true;
                return Err(e);
            }
        };
        drop(inner);

        if let Err(e) = self.apply_block_locked(mined.clone()).await {
            let mut inner = self.inner.lock().await;
            inner.ready_to_mine = true;
            return Err(e);
        }
        let _ = self.broadcast_tx.send(Message::Blk(mined));
        Ok(())
    }

    // ---- peer wiring -------------------------------------------------

    async fn send_to(&self, addr: SocketAddr, msg: Message) -> crate::error::Result<()> {
        let peers = self.peers.lock().await;
        match peers.get(&addr) {
            Some(handle) => handle
                .sender
                .send(msg)
                .map_err(|_| NetworkError::UnsupportedMessage("peer channel closed").into()),
            None => Err(NetworkError::UnsupportedMessage("unknown peer").into()),
        }
    }

    async fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr, _is_outbound: bool) -> crate::error::Result<()> {
        let mut framed = FramedStream::new(stream);
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.peers.lock().await.insert(addr, PeerHandle { address: None, sender: tx });

        let hey_id = self.requests.next_id();
        framed.send(&Message::Hey { address: self.account.address.clone(), request_id: hey_id }).await?;

        let handshake_deadline = now() + HANDSHAKE_TIMEOUT_SECS;
        let mut peer_address: Option<Address> = None;

        let result: crate::error::Result<()> = loop {
            tokio::select! {
                incoming = framed.recv() => {
                    let msg = match incoming {
                        Ok(Some(m)) => m,
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    };

                    if peer_address.is_none() && now() > handshake_deadline {
                        break Err(NetworkError::Timeout { request_id: hey_id, peer: addr.to_string() }.into());
                    }

                    if let Some(request_id) = msg.request_id() {
                        self.requests.complete(request_id, msg.clone()).await;
                    }

                    match msg {
                        Message::Hey { address, request_id } => {
                            peer_address = Some(address.clone());
                            if let Some(p) = self.peers.lock().await.get_mut(&addr) {
                                p.address = Some(address.clone());
                            }
                            framed.send(&Message::Ack { address: self.account.address.clone(), request_id }).await?;
                        }
                        Message::Ack { address, .. } => {
                            peer_address = Some(address.clone());
                            if let Some(p) = self.peers.lock().await.get_mut(&addr) {
                                p.address = Some(address);
                            }
                        }
                        Message::Rbh { my_height, request_id } => {
                            let height = self.inner.lock().await.chain.height();
                            if height > my_height {
                                framed.send(&Message::Blh { height, address: self.account.address.clone(), request_id }).await?;
                            }
                        }
                        Message::Rbl { start_from, request_id } => {
                            let mut inner = self.inner.lock().await;
                            let height = inner.chain.height();
                            let mut blocks = Vec::new();
                            if start_from <= height {
                                for n in start_from..=height {
                                    if let Some(b) = inner.chain.get_block(n)? {
                                        blocks.push(b);
                                    }
                                }
                            }
                            drop(inner);
                            framed.send(&Message::Abl { blocks, request_id }).await?;
                        }
                        Message::Lrq { my_address, request_id } => {
                            framed.send(&Message::Lrs { its_address: self.account.address.clone(), request_id }).await?;
                            let should_reelect = {
                                let inner = self.inner.lock().await;
                                inner.am_leader && my_address > self.account.address
                            };
                            if should_reelect {
                                tokio::spawn(Arc::clone(self).yield_and_reelect());
                            }
                        }
                        Message::Txn(tx) => {
                            if let Err(e) = self.receive_transaction(tx.clone()).await {
                                eprintln!("[node] rejected tx {}: {e}", tx.id);
                            }
                        }
                        Message::Blk(block) | Message::Glk(block) => {
                            let number = block.number;
                            if let Err(e) = self.receive_block(block).await {
                                eprintln!("[node] rejected block {number}: {e}");
                            }
                        }
                        Message::Blh { .. } | Message::Abl { .. } | Message::Lrs { .. } => {
                            // already delivered to the waiting request above
                        }
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => framed.send(&msg).await?,
                        None => break Ok(()),
                    }
                }
            }
        };

        self.peers.lock().await.remove(&addr);
        self.requests.discard_for_peer(addr).await;

        let was_leader = {
            let inner = self.inner.lock().await;
            peer_address.is_some() && inner.leader == peer_address
        };
        if was_leader {
            tokio::spawn(Arc::clone(self).yield_and_reelect());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    /// Leader election itself needs live peer connections to exercise
    /// end-to-end, so this pins down just the tie-breaking rule
    /// `elect_leader` relies on: the lexicographically greatest
    /// address among the candidates wins, self included.
    #[test]
    fn max_address_wins_leadership() {
        let candidates = vec!["aaa0".to_string(), "zzz9".to_string(), "mmm5".to_string()];
        let winner = candidates.into_iter().max().unwrap();
        assert_eq!(winner, "zzz9");
    }
}
