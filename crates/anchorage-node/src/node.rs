//! Anchorage devnet node
//!
//! Hosts the finality engine on top of the in-memory `DevChain`, drives it
//! from two timers (block production and external chain polling), and
//! persists the anchor state after every trigger.

use crate::config::{NodeConfig, SpvMode};
use crate::devnet::{DevChain, RecordedPayout};
use crate::genesis::{self, DEVNET_GENESIS_TIME};
use crate::metrics::{AnchorMetrics, MetricsServer};
use crate::rpc_server::{RpcHandlers, RpcServer};

use anchorage_bridge::{BitcoinRpcClient, FakeSpv, LightClient};
use anchorage_consensus::{ChainReader, FinalityEngine};
use anchorage_economics::{AnchorRewardPool, CommunityBalanceRegister};
use anchorage_storage::AnchorDb;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;

/// Node state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Node is starting up
    Starting,
    /// Node is producing blocks
    Running,
    /// Node is shutting down
    Stopping,
    /// Node has stopped
    Stopped,
}

/// Anchorage devnet node
pub struct AnchorageNode {
    /// Configuration
    config: NodeConfig,
    /// Data directory
    data_dir: PathBuf,
    /// Node state
    state: Arc<RwLock<NodeState>>,
    chain: Arc<DevChain>,
    /// Set when the external chain is simulated in memory
    fake_spv: Option<Arc<FakeSpv>>,
    engine: Arc<FinalityEngine>,
    store: Option<AnchorDb>,
    metrics: AnchorMetrics,
}

impl AnchorageNode {
    /// Create a node, restoring any persisted anchor state
    pub async fn new(config: NodeConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&data_dir)?;

        let devnet = &config.devnet;
        let genesis = genesis::load_or_create(
            &data_dir.join("genesis.json"),
            &devnet.seed,
            devnet.validators,
        )?;
        tracing::info!("Genesis hash: {}", &genesis.genesis_hash[..16]);

        let keys = genesis::devnet_keys(&devnet.seed, devnet.validators);
        let chain = Arc::new(DevChain::new(
            keys.iter().map(|k| k.id()).collect(),
            DEVNET_GENESIS_TIME,
            devnet.time_step_secs,
        ));

        let (spv, fake_spv): (Arc<dyn LightClient>, Option<Arc<FakeSpv>>) = match config.spv.mode {
            SpvMode::Fake => {
                let fake = Arc::new(FakeSpv::new(config.spv.fake_start_height));
                (fake.clone(), Some(fake))
            }
            SpvMode::Rpc => {
                let client = BitcoinRpcClient::new(config.spv.rpc_config())?;
                tracing::info!("External chain via Bitcoin Core at {}", config.spv.url);
                (Arc::new(client), None)
            }
        };

        let pool = AnchorRewardPool::new(
            Arc::new(CommunityBalanceRegister::new()),
            config.reward_schedule(),
        );
        let local_keys = keys.into_iter().take(devnet.local_count()).collect();
        let engine = Arc::new(FinalityEngine::new(
            config.finality_config(),
            chain.clone(),
            chain.clone(),
            spv,
            pool,
            local_keys,
        ));

        let store = if config.storage.enabled {
            Some(Self::init_storage(&data_dir, &config)?)
        } else {
            tracing::info!("Storage disabled, anchor state is kept in memory");
            None
        };

        let node = Self {
            config,
            data_dir,
            state: Arc::new(RwLock::new(NodeState::Starting)),
            chain,
            fake_spv,
            engine,
            store,
            metrics: AnchorMetrics::new()?,
        };
        node.restore()?;
        Ok(node)
    }

    /// Get current state
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn engine(&self) -> &Arc<FinalityEngine> {
        &self.engine
    }

    pub fn chain(&self) -> &Arc<DevChain> {
        &self.chain
    }

    /// In-memory external chain, `None` in RPC mode
    pub fn fake_spv(&self) -> Option<&Arc<FakeSpv>> {
        self.fake_spv.as_ref()
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Mint one block and run the engine on it
    pub async fn produce_block(&self) -> anyhow::Result<u64> {
        let block = self.chain.mint();
        let height = block.height;

        if let Some(fake) = &self.fake_spv {
            let every = self.config.devnet.external_block_every;
            if every > 0 && height % every == 0 {
                fake.set_last_height(fake.last_height() + 1);
            }
        }

        self.engine.on_block_connected(block).await?;
        self.after_trigger()?;
        Ok(height)
    }

    /// Follow the external chain between blocks
    pub async fn poll_external(&self) -> anyhow::Result<()> {
        self.engine.poll_external().await?;
        self.after_trigger()
    }

    /// Disconnect the local tip and undo its effects
    pub fn disconnect_tip(&self) -> anyhow::Result<Option<u64>> {
        let Some(block) = self.chain.disconnect_tip() else {
            return Ok(None);
        };
        self.engine.on_block_disconnected(&block)?;
        self.after_trigger()?;
        Ok(Some(block.height))
    }

    fn after_trigger(&self) -> anyhow::Result<()> {
        self.metrics
            .update(self.chain.current_height(), &self.engine.stats());
        if let Some(store) = &self.store {
            store.save_snapshot(&self.engine.snapshot())?;
            let payouts = serde_json::to_string_pretty(&self.chain.recorded_payouts())?;
            std::fs::write(self.payouts_path(), payouts)?;
        }
        Ok(())
    }

    /// Payouts the devnet chain mined, replayed with it on restart
    fn payouts_path(&self) -> PathBuf {
        self.data_dir.join("devnet_payouts.json")
    }

    fn load_payouts(&self) -> anyhow::Result<Vec<RecordedPayout>> {
        let path = self.payouts_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Run the node until Ctrl+C or SIGTERM
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Starting Anchorage node...");

        let rpc_handle = if self.config.rpc.enabled {
            let handlers = RpcHandlers::new(self.engine.clone(), self.chain.clone());
            let rpc_server = RpcServer::new(&self.config.rpc, handlers);
            Some(tokio::spawn(async move {
                if let Err(e) = rpc_server.run().await {
                    tracing::error!("RPC server error: {}", e);
                }
            }))
        } else {
            None
        };

        let metrics_handle = if self.config.metrics.enabled {
            let metrics_server = MetricsServer::new(&self.config.metrics, self.metrics.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = metrics_server.run().await {
                    tracing::error!("Metrics server error: {}", e);
                }
            }))
        } else {
            None
        };

        let events_handle = self.start_event_logger();

        *self.state.write() = NodeState::Running;
        self.print_startup_banner();

        let mut producer = tokio::time::interval(self.config.devnet.block_interval());
        let mut poller = tokio::time::interval(self.config.spv.poll_interval());
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = producer.tick() => {
                    if let Err(e) = self.produce_block().await {
                        tracing::error!("Block production failed: {}", e);
                    }
                }
                _ = poller.tick() => {
                    if let Err(e) = self.poll_external().await {
                        tracing::warn!("External chain poll failed: {}", e);
                    }
                }
            }
        }

        // Graceful shutdown
        *self.state.write() = NodeState::Stopping;
        tracing::info!("Shutting down...");

        for handle in [rpc_handle, metrics_handle, Some(events_handle)]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        self.after_trigger()?;

        *self.state.write() = NodeState::Stopped;
        tracing::info!("Node stopped");
        Ok(())
    }

    /// Log engine events as JSON at debug level
    fn start_event_logger(&self) -> JoinHandle<()> {
        let mut events = self.engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let body = serde_json::to_string(&event).unwrap_or_default();
                        tracing::debug!(event = event.name(), "{}", body);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("event logger skipped {} events", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Print startup banner with node information
    fn print_startup_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════════════════╗");
        tracing::info!("║                 ANCHORAGE NODE IS RUNNING                    ║");
        tracing::info!("╚══════════════════════════════════════════════════════════════╝");
        tracing::info!("");
        tracing::info!("Name: {}", self.config.node.name);
        tracing::info!(
            "Masternodes: {} ({} local)",
            self.config.devnet.validators,
            self.engine.local_validators().len()
        );
        let anchor = &self.config.anchor;
        tracing::info!(
            "Anchoring: every {} blocks, {}s deep, quorum {}/{}",
            anchor.frequency,
            anchor.depth_secs,
            anchor.quorum,
            anchor.team_size
        );
        match &anchor.reward_address {
            Some(address) => tracing::info!("Reward address: {}", address),
            None => tracing::info!("Reward address: none (signing only)"),
        }
        tracing::info!("External chain: {:?}", self.config.spv.mode);

        if self.config.rpc.enabled {
            tracing::info!("JSON-RPC: http://{}", self.config.rpc.address);
        }
        if self.config.metrics.enabled {
            tracing::info!("Metrics: http://{}/metrics", self.config.metrics.address);
        }

        tracing::info!("");
        tracing::info!("Press Ctrl+C to stop the node");
    }

    /// Initialize storage
    fn init_storage(data_dir: &std::path::Path, config: &NodeConfig) -> anyhow::Result<AnchorDb> {
        let db_path = data_dir.join(&config.storage.db_dir);
        std::fs::create_dir_all(&db_path)?;
        let db = AnchorDb::open(&db_path)?;
        tracing::info!("Storage initialized at {:?}", db_path);
        Ok(db)
    }

    /// Reload the persisted anchor state
    ///
    /// The devnet chain is deterministic, so it is rebuilt up to the stored
    /// local height, with the payouts it mined, before the anchors are
    /// re-linked.
    fn restore(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(snapshot) = store.load_snapshot()? else {
            return Ok(());
        };

        let payouts = self.load_payouts()?;
        self.chain.fast_forward(snapshot.local_height, &payouts);

        if let Some(fake) = &self.fake_spv {
            fake.set_last_height(fake.last_height().max(snapshot.external_height));
            for pending in &snapshot.pending {
                fake.set_tx_height(pending.btc_tx_hash, pending.btc_block_height);
            }
        }

        let anchors = snapshot.anchors.len();
        let pending = snapshot.pending.len();
        self.engine.restore(snapshot)?;
        tracing::info!(
            "Restored {} anchors and {} pending, local chain replayed to {}",
            anchors,
            pending,
            self.chain.current_height()
        );
        self.metrics
            .update(self.chain.current_height(), &self.engine.stats());
        Ok(())
    }
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
