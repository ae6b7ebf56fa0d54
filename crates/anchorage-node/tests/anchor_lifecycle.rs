//! End-to-end anchoring over the devnet chain

use anchorage_bridge::FakeSpv;
use anchorage_consensus::{ChainReader, FinalityConfig, FinalityEngine};
use anchorage_economics::{AnchorRewardPool, AnchorRewardSchedule, CommunityBalanceRegister};
use anchorage_node::{genesis, AnchorageNode, DevChain, NodeConfig};
use std::sync::Arc;
use tempfile::TempDir;

const STEP_SECS: i64 = 1000;
const ADDRESS: &str = "mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU";

struct Devnet {
    engine: FinalityEngine,
    chain: Arc<DevChain>,
    spv: Arc<FakeSpv>,
}

impl Devnet {
    fn new(config: FinalityConfig) -> Self {
        let keys = genesis::devnet_keys("test", 3);
        let chain = Arc::new(DevChain::new(
            keys.iter().map(|k| k.id()).collect(),
            0,
            STEP_SECS,
        ));
        let spv = Arc::new(FakeSpv::new(15));
        let pool = AnchorRewardPool::new(
            Arc::new(CommunityBalanceRegister::new()),
            AnchorRewardSchedule::default(),
        );
        let engine = FinalityEngine::new(
            config,
            chain.clone(),
            chain.clone(),
            spv.clone(),
            pool,
            keys,
        );
        Self { engine, chain, spv }
    }

    async fn mint(&self) {
        let block = self.chain.mint();
        self.engine.on_block_connected(block).await.unwrap();
    }

    async fn mint_to(&self, height: u64) {
        while self.chain.current_height() < height {
            self.mint().await;
        }
    }

    fn pool(&self) -> String {
        self.engine.stats().reward_pool.to_string()
    }
}

fn config() -> FinalityConfig {
    FinalityConfig {
        reward_address: Some(ADDRESS.to_string()),
        ..FinalityConfig::default()
    }
}

#[tokio::test]
async fn test_anchor_is_rewarded_on_devnet() {
    let net = Devnet::new(config());
    net.mint_to(30).await;

    let pending = net.engine.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].btc_block_height, Some(15));
    assert_eq!(pending[0].confirmations, 1);

    net.mint().await;
    let anchors = net.engine.list_anchors();
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].anchor.defi_block_height, 15);
    assert_eq!(
        Some(anchors[0].anchor.defi_block_hash),
        net.chain.block_hash_at(15)
    );

    net.spv.set_last_height(19);
    net.engine.poll_external().await.unwrap();
    assert_eq!(net.engine.list_anchors()[0].confirmations, 5);
    assert!(net.chain.queued_payouts().is_empty());

    net.spv.set_last_height(20);
    net.engine.poll_external().await.unwrap();
    let queued = net.chain.queued_payouts();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].amount.to_string(), "3.10000000");
    assert_eq!(queued[0].reward_address, ADDRESS);

    // the payout rides in the next block
    net.mint().await;
    let rewarded = net.engine.list_rewarded();
    assert_eq!(rewarded.len(), 1);
    assert_eq!(rewarded[0].anchor_height, 15);
    assert!(net.engine.list_unrewarded().is_empty());
    assert_eq!(net.pool(), "0.10000000");
    assert_eq!(
        net.engine.community_balances()["AnchorReward"].to_string(),
        "0.10000000"
    );
}

#[tokio::test]
async fn test_disconnected_payout_is_paid_again() {
    let net = Devnet::new(config());
    net.mint_to(31).await;
    net.spv.set_last_height(20);
    net.engine.poll_external().await.unwrap();
    net.mint().await;
    assert_eq!(net.pool(), "0.10000000");

    let block = net.chain.disconnect_tip().unwrap();
    assert_eq!(block.payouts.len(), 1);
    net.engine.on_block_disconnected(&block).unwrap();
    assert!(net.engine.list_rewarded().is_empty());
    assert_eq!(net.pool(), "3.10000000");

    net.engine.poll_external().await.unwrap();
    assert_eq!(net.chain.queued_payouts().len(), 1);

    net.mint().await;
    assert_eq!(net.engine.list_rewarded().len(), 1);
    assert_eq!(net.pool(), "0.10000000");
}

#[tokio::test]
async fn test_queued_payout_follows_disconnect() {
    let net = Devnet::new(config());
    net.mint_to(31).await;
    net.spv.set_last_height(20);
    net.mint().await;
    assert_eq!(net.chain.queued_payouts()[0].amount.to_string(), "3.20000000");

    let block = net.chain.disconnect_tip().unwrap();
    net.engine.on_block_disconnected(&block).unwrap();
    let queued = net.chain.queued_payouts();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].amount.to_string(), "3.10000000");

    net.mint().await;
    assert_eq!(net.engine.list_rewarded().len(), 1);
    assert_eq!(net.pool(), "0.10000000");
}

#[tokio::test]
async fn test_pool_pays_out_at_sixty_one() {
    let net = Devnet::new(config());
    net.mint_to(60).await;
    assert_eq!(net.pool(), "6.00000000");
    assert!(net.chain.queued_payouts().is_empty());

    // six external confirmations by the time block 61 connects
    net.spv.set_last_height(20);
    net.mint().await;
    let queued = net.chain.queued_payouts();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].defi_block_height, 15);
    assert_eq!(queued[0].amount.to_string(), "6.10000000");

    net.mint().await;
    assert_eq!(net.engine.list_rewarded()[0].reward_address, ADDRESS);
    assert_eq!(net.pool(), "0.10000000");
    // the anchor for block 30 is next in line
    assert_eq!(net.engine.list_unrewarded().len(), 1);
    assert_eq!(net.engine.list_unrewarded()[0].dfi_height, 30);
}

#[tokio::test]
async fn test_anchor_chain_grows() {
    let net = Devnet::new(config());
    net.mint_to(46).await;

    let anchors = net.engine.list_anchors();
    assert_eq!(anchors.len(), 2);
    assert_eq!(anchors[1].anchor.defi_block_height, 30);
    assert_eq!(anchors[1].anchor.creation_height, 45);
    assert_eq!(anchors[1].anchor.previous_anchor, anchors[0].anchor.hash());
}

#[tokio::test]
async fn test_lower_quorum_trims_signatures() {
    let net = Devnet::new(FinalityConfig {
        quorum: 2,
        ..config()
    });
    net.mint_to(30).await;

    assert_eq!(net.engine.list_auths()[0].signers, 3);
    assert_eq!(net.engine.list_pending()[0].signatures, 2);
}

fn node_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.rpc.enabled = false;
    config.metrics.enabled = false;
    config.anchor.reward_address = Some(ADDRESS.to_string());
    config.devnet.seed = "restart".to_string();
    config.devnet.time_step_secs = STEP_SECS;
    config.devnet.external_block_every = 0;
    config.spv.fake_start_height = 15;
    config
}

#[tokio::test]
async fn test_node_restores_anchors_after_restart() {
    let temp_dir = TempDir::new().unwrap();

    let before = {
        let node = AnchorageNode::new(node_config(), temp_dir.path().to_path_buf())
            .await
            .unwrap();
        for _ in 0..31 {
            node.produce_block().await.unwrap();
        }
        assert_eq!(node.engine().list_anchors().len(), 1);
        node.engine().list_anchors()
    };

    let node = AnchorageNode::new(node_config(), temp_dir.path().to_path_buf())
        .await
        .unwrap();
    assert_eq!(node.chain().current_height(), 31);
    assert_eq!(node.engine().list_anchors(), before);
    assert_eq!(
        node.engine().stats().reward_pool.to_string(),
        "3.10000000"
    );

    // the restored anchor keeps its place in the chain
    node.fake_spv().unwrap().set_last_height(20);
    node.poll_external().await.unwrap();
    assert_eq!(node.engine().list_unrewarded().len(), 1);
    assert_eq!(node.chain().queued_payouts().len(), 1);
}

#[tokio::test]
async fn test_restart_replays_mined_payouts() {
    let temp_dir = TempDir::new().unwrap();

    {
        let node = AnchorageNode::new(node_config(), temp_dir.path().to_path_buf())
            .await
            .unwrap();
        for _ in 0..31 {
            node.produce_block().await.unwrap();
        }
        node.fake_spv().unwrap().set_last_height(20);
        node.poll_external().await.unwrap();
        node.produce_block().await.unwrap();
        assert_eq!(node.engine().list_rewarded().len(), 1);
    }

    let node = AnchorageNode::new(node_config(), temp_dir.path().to_path_buf())
        .await
        .unwrap();
    assert_eq!(node.chain().current_height(), 32);
    let rewarded = node.engine().list_rewarded();
    assert_eq!(rewarded.len(), 1);
    let block = node.chain().block(32).unwrap();
    assert_eq!(block.payouts.len(), 1);
    assert_eq!(block.payouts[0].txid, rewarded[0].dfi_reward_hash);
    assert_eq!(
        node.engine().stats().reward_pool.to_string(),
        "0.10000000"
    );

    // the replayed payout block can still be undone
    assert_eq!(node.disconnect_tip().unwrap(), Some(32));
    assert!(node.engine().list_rewarded().is_empty());
    assert_eq!(
        node.engine().stats().reward_pool.to_string(),
        "3.10000000"
    );
}
