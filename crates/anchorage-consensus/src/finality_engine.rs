//! # Finality Engine
//!
//! Drives the anchor lifecycle for one node.
//!
//! ## Anchor Lifecycle
//!
//! ```text
//! Created ──► Pending ──► Anchored ──► Active ──► Rewarded
//! (auth       (broadcast)  (1 external  (activation  (payout
//!  quorum)                  confirm)     threshold)   mined)
//! ```
//!
//! ## Triggers
//!
//! - `on_block_connected` / `on_block_disconnected` from the local chain
//! - `poll_external` on a timer, to follow the external chain depth
//!
//! All anchor state sits behind one mutex. Light-client calls are made with
//! the lock released; their results are re-checked under the lock before
//! anything is mutated.

use crate::anchor::{Anchor, AnchorChain, AnchorView, RewardedView, UnrewardedView};
use crate::auth::{AnchorAuth, AuthGroup, AuthLedger, Submission};
use crate::events::AnchorEvent;
use crate::interfaces::{BlockBuilder, ChainReader, ConnectedBlock};
use crate::payload::AnchorPayload;
use crate::pending::{PendingAnchor, PendingTracker, PendingView};
use crate::reward::{RewardConfirmGroup, RewardConfirmation, RewardLedger, RewardPayout};
use crate::team::{AnchorTeams, TeamSelector};
use anchorage_bridge::{ExternalTx, LightClient};
use anchorage_core::constants;
use anchorage_core::{AnchorError, BlockHash, Result, TxHash, ValidatorId};
use anchorage_crypto::ValidatorKey;
use anchorage_economics::{Amount, AnchorRewardPool, CommunityAccountType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Finality engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityConfig {
    /// Members per auth team and per confirm team
    pub team_size: usize,

    /// Distinct signers required for auth and reward quorums
    pub quorum: usize,

    /// Local blocks between anchor candidates
    pub frequency: u64,

    /// Chain time an anchored block must be buried under
    pub depth_secs: i64,

    /// External confirmations after which an anchor is active
    pub activation_threshold: u64,

    pub team_lookback_secs: i64,
    pub team_change_period: u64,

    /// Check Ed25519 signatures on auths and reward confirmations
    pub verify_signatures: bool,

    /// External address nominated for rewards; without one this node signs but never broadcasts
    pub reward_address: Option<String>,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            team_size: constants::TEAM_SIZE,
            quorum: constants::ANCHOR_QUORUM,
            frequency: constants::ANCHOR_FREQUENCY,
            depth_secs: constants::ANCHOR_DEPTH_SECS,
            activation_threshold: constants::ACTIVATION_THRESHOLD,
            team_lookback_secs: constants::TEAM_LOOKBACK_SECS,
            team_change_period: constants::TEAM_CHANGE_PERIOD,
            verify_signatures: true,
            reward_address: None,
        }
    }
}

/// Counters exported as metrics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub external_height: u64,
    pub pending: usize,
    pub anchors: usize,
    pub active: usize,
    pub rewarded: usize,
    pub reward_pool: Amount,
}

/// Persistable engine state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSnapshot {
    /// Local tip when the snapshot was taken
    pub local_height: u64,
    pub anchors: Vec<Anchor>,
    pub pending: Vec<PendingAnchor>,
    pub external_height: u64,
    pub balances: Vec<(CommunityAccountType, Amount)>,
}

#[derive(Debug)]
struct AnchorState {
    chain: AnchorChain,
    pending: PendingTracker,
    auths: AuthLedger,
    rewards: RewardLedger,
    external_height: u64,
    /// Anchor whose payout was handed to the block builder and not yet mined
    queued_payout: Option<TxHash>,
    /// Heights this node already broadcast an anchor for
    broadcast_heights: BTreeSet<u64>,
}

/// Finality engine - anchor lifecycle state machine
pub struct FinalityEngine {
    config: FinalityConfig,
    chain: Arc<dyn ChainReader>,
    builder: Arc<dyn BlockBuilder>,
    spv: Arc<dyn LightClient>,
    pool: AnchorRewardPool,
    selector: TeamSelector,
    /// Operator keys of the masternodes run by this node
    keys: Vec<ValidatorKey>,
    state: Mutex<AnchorState>,
    events: broadcast::Sender<AnchorEvent>,
}

impl FinalityEngine {
    pub fn new(
        config: FinalityConfig,
        chain: Arc<dyn ChainReader>,
        builder: Arc<dyn BlockBuilder>,
        spv: Arc<dyn LightClient>,
        pool: AnchorRewardPool,
        keys: Vec<ValidatorKey>,
    ) -> Self {
        let selector = TeamSelector::new(
            config.team_size,
            config.team_lookback_secs,
            config.team_change_period,
        );
        let state = AnchorState {
            chain: AnchorChain::new(),
            pending: PendingTracker::new(),
            auths: AuthLedger::new(config.verify_signatures),
            rewards: RewardLedger::new(config.verify_signatures),
            external_height: 0,
            queued_payout: None,
            broadcast_heights: BTreeSet::new(),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            chain,
            builder,
            spv,
            pool,
            selector,
            keys,
            state: Mutex::new(state),
            events,
        }
    }

    pub fn config(&self) -> &FinalityConfig {
        &self.config
    }

    pub fn local_validators(&self) -> Vec<ValidatorId> {
        self.keys.iter().map(ValidatorKey::id).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AnchorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Process a newly connected local block
    pub async fn on_block_connected(&self, block: ConnectedBlock) -> Result<()> {
        self.apply_payouts(&block)?;
        self.pool.accrue(block.height)?;

        self.refresh_external().await;
        self.promote_confirmed().await;
        self.run_duties(block.height).await?;
        self.prune();
        Ok(())
    }

    /// Undo a disconnected local block: its accrual and any payout it mined
    ///
    /// A payout queued but not yet mined is handed to the builder again,
    /// priced against the pool as it stands after the undo.
    pub fn on_block_disconnected(&self, block: &ConnectedBlock) -> Result<()> {
        let requeue = {
            let mut state = self.state.lock();
            self.revert_block(&mut state, block)?;

            let threshold = self.config.activation_threshold;
            let requeue = state
                .queued_payout
                .and_then(|hash| {
                    state
                        .chain
                        .oldest_unrewarded(state.external_height, threshold)
                        .filter(|anchor| anchor.hash() == hash)
                })
                .map(|anchor| RewardPayout::for_anchor(anchor, self.pool.current()));
            if requeue.is_none() {
                state.queued_payout = None;
            }
            requeue
        };

        if let Some(payout) = requeue {
            debug!(
                "re-queued reward payout for anchor {} at {}",
                payout.anchor_hash, payout.amount
            );
            self.builder.queue_reward_payout(payout);
        }
        Ok(())
    }

    fn revert_block(&self, state: &mut AnchorState, block: &ConnectedBlock) -> Result<()> {
        self.pool.unaccrue(block.height)?;
        for mined in &block.payouts {
            let anchor_hash = mined.payout.anchor_hash;
            if state.chain.clear_reward(&anchor_hash, &mined.txid) {
                self.pool.refund(mined.payout.amount)?;
                info!(
                    "reward {} for anchor {} reverted by disconnect of block {}",
                    mined.txid, anchor_hash, block.height
                );
                self.emit(AnchorEvent::RewardReverted {
                    anchor_hash,
                    txid: mined.txid,
                    amount: mined.payout.amount,
                });
            }
        }
        Ok(())
    }

    /// Follow the external chain between local blocks
    pub async fn poll_external(&self) -> Result<()> {
        let tip = self.chain.current_height();
        self.refresh_external().await;
        self.promote_confirmed().await;
        self.run_duties(tip).await?;
        self.prune();
        Ok(())
    }

    // ========================================================================
    // Gossip entry points
    // ========================================================================

    /// Admit an anchor auth from another node
    pub async fn submit_auth(&self, auth: AnchorAuth) -> Result<Submission> {
        let teams = self.selector.teams_at(self.chain.as_ref(), auth.creation_height)?;
        let block_height = auth.block_height;
        let block_hash = auth.block_hash;

        let submission = self.state.lock().auths.submit(auth, &teams)?;
        if let Submission::Accepted { signers } = submission {
            if signers == self.config.quorum {
                self.announce_auth_quorum(block_height, block_hash, signers);
            }
            let tip = self.chain.current_height();
            self.broadcast_ready(tip).await;
        }
        Ok(submission)
    }

    /// Admit a reward confirmation from another node
    pub fn submit_reward_confirmation(&self, conf: RewardConfirmation) -> Result<Submission> {
        let teams = self.selector.teams_at(self.chain.as_ref(), conf.creation_height)?;

        let (submission, payout) = {
            let mut state = self.state.lock();
            let rewardable = state
                .chain
                .oldest_unrewarded(state.external_height, self.config.activation_threshold)
                .cloned();
            let submission = state.rewards.submit(conf, &teams, rewardable.as_ref())?;
            let payout = rewardable.and_then(|anchor| self.take_payout(&mut state, &anchor));
            (submission, payout)
        };

        if let Some(payout) = payout {
            self.builder.queue_reward_payout(payout);
        }
        Ok(submission)
    }

    /// Admit an anchor transaction seen on the external chain
    ///
    /// Returns `false` when the transaction is already tracked.
    pub fn observe_anchor_tx(
        &self,
        btc_tx_hash: TxHash,
        payload: &[u8],
        btc_block_height: Option<u64>,
    ) -> Result<bool> {
        let payload = AnchorPayload::decode(payload)?;
        let height = payload.defi_block_height;
        match self.chain.block_hash_at(height) {
            Some(hash) if hash == payload.defi_block_hash => {}
            _ => {
                warn!(
                    "anchor tx {} references unknown block {} at height {}",
                    btc_tx_hash, payload.defi_block_hash, height
                );
                return Err(AnchorError::UnknownBlock(height));
            }
        }

        let mut state = self.state.lock();
        if state.chain.contains(&btc_tx_hash) {
            return Ok(false);
        }
        let head_height = state.chain.head_defi_height();
        if !state.chain.is_empty() && height <= head_height {
            return Err(AnchorError::StaleAnchor {
                defi_height: height,
                head_height,
            });
        }
        Ok(state
            .pending
            .observe(PendingAnchor::from_payload(btc_tx_hash, btc_block_height, payload)))
    }

    // ========================================================================
    // Lifecycle steps
    // ========================================================================

    fn apply_payouts(&self, block: &ConnectedBlock) -> Result<()> {
        if block.payouts.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let external_height = state.external_height;

        for mined in &block.payouts {
            let payout = &mined.payout;
            let rewardable = state
                .chain
                .oldest_unrewarded(external_height, self.config.activation_threshold)
                .is_some_and(|a| a.hash() == payout.anchor_hash);
            if !rewardable {
                warn!(
                    "block {} pays anchor {} which is not rewardable",
                    block.height, payout.anchor_hash
                );
                continue;
            }

            let pool = self.pool.current();
            if payout.amount > pool {
                warn!(
                    "block {} pays {} for anchor {} but the pool holds {}",
                    block.height, payout.amount, payout.anchor_hash, pool
                );
                // priced against a pool that was since reduced; re-queue at the current amount
                if state.queued_payout == Some(payout.anchor_hash) {
                    state.queued_payout = None;
                }
                continue;
            }

            self.pool.settle(payout.amount)?;
            state.chain.set_reward(&payout.anchor_hash, mined.txid)?;
            state.rewards.discard(&payout.defi_block_hash);
            if state.queued_payout == Some(payout.anchor_hash) {
                state.queued_payout = None;
            }

            info!(
                "anchor {} rewarded {} to {} in tx {}",
                payout.anchor_hash, payout.amount, payout.reward_address, mined.txid
            );
            self.emit(AnchorEvent::RewardPaid {
                anchor_hash: payout.anchor_hash,
                txid: mined.txid,
                reward_address: payout.reward_address.clone(),
                amount: payout.amount,
            });
        }
        Ok(())
    }

    /// Pull the external height and pending inclusion heights from the bridge
    ///
    /// A bridge failure leaves local state untouched; the next trigger retries.
    async fn refresh_external(&self) -> bool {
        let txs = self.state.lock().pending.tx_hashes();

        let external_height = match self.spv.current_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!("{} unavailable: {}", self.spv.name(), e);
                return false;
            }
        };
        let mut inclusions = Vec::with_capacity(txs.len());
        for tx in txs {
            match self.spv.tx_block_height(&tx).await {
                Ok(included) => inclusions.push((tx, included)),
                Err(e) => {
                    warn!("{} unavailable: {}", self.spv.name(), e);
                    return false;
                }
            }
        }

        let mut state = self.state.lock();
        let previous = state.external_height;
        state.external_height = external_height;
        for (tx, included) in inclusions {
            state.pending.set_inclusion(&tx, included);
        }

        let threshold = self.config.activation_threshold;
        let activated: Vec<(TxHash, u64)> = state
            .chain
            .iter()
            .filter(|a| !a.is_active(previous, threshold) && a.is_active(external_height, threshold))
            .map(|a| (a.hash(), a.defi_block_height))
            .collect();
        drop(state);

        for (anchor_hash, defi_block_height) in activated {
            info!(
                "anchor {} for height {} active at external height {}",
                anchor_hash, defi_block_height, external_height
            );
            self.emit(AnchorEvent::AnchorActivated {
                anchor_hash,
                defi_block_height,
            });
        }
        true
    }

    /// Move pending anchors with at least one confirmation onto the anchor chain
    async fn promote_confirmed(&self) -> usize {
        let candidates = {
            let state = self.state.lock();
            state.pending.confirmed(state.external_height)
        };
        if candidates.is_empty() {
            return 0;
        }

        let mut block_hashes = BTreeMap::new();
        for btc_height in candidates.iter().filter_map(|p| p.btc_block_height) {
            if block_hashes.contains_key(&btc_height) {
                continue;
            }
            match self.spv.block_hash_at(btc_height).await {
                Ok(hash) => {
                    block_hashes.insert(btc_height, hash);
                }
                Err(e) => {
                    warn!("{} unavailable: {}", self.spv.name(), e);
                    return 0;
                }
            }
        }

        let mut promoted = 0;
        let mut state = self.state.lock();
        let external_height = state.external_height;
        for candidate in candidates {
            // re-check: the entry may have moved while the lock was released
            let Some(pending) = state.pending.get(&candidate.btc_tx_hash).cloned() else {
                continue;
            };
            let Some(btc_block_height) = pending.btc_block_height else {
                continue;
            };
            let Some(btc_block_hash) = block_hashes.get(&btc_block_height).copied() else {
                continue;
            };
            if pending.confirmations(external_height) < 1 {
                continue;
            }
            let head_height = state.chain.head_defi_height();
            if pending.defi_block_height <= head_height {
                debug!(
                    "pending anchor {} for height {} is stale, head at {}",
                    pending.btc_tx_hash, pending.defi_block_height, head_height
                );
                continue;
            }

            let anchor = Anchor {
                btc_block_height,
                btc_block_hash,
                btc_tx_hash: pending.btc_tx_hash,
                previous_anchor: state.chain.head_hash(),
                defi_block_height: pending.defi_block_height,
                defi_block_hash: pending.defi_block_hash,
                reward_address: pending.reward_address.clone(),
                creation_height: pending.creation_height,
                signatures: pending.signatures,
                dfi_reward_hash: None,
            };
            let active = anchor.is_active(external_height, self.config.activation_threshold);
            let event = AnchorEvent::AnchorPromoted {
                anchor_hash: anchor.hash(),
                previous_anchor: anchor.previous_anchor,
                defi_block_height: anchor.defi_block_height,
                btc_block_height,
            };

            match state.chain.append(anchor) {
                Ok(_) => {
                    state.pending.remove(&pending.btc_tx_hash);
                    promoted += 1;
                    info!(
                        "anchor {} for height {} confirmed at external height {}",
                        pending.btc_tx_hash, pending.defi_block_height, btc_block_height
                    );
                    self.emit(event);
                    if active {
                        self.emit(AnchorEvent::AnchorActivated {
                            anchor_hash: pending.btc_tx_hash,
                            defi_block_height: pending.defi_block_height,
                        });
                    }
                }
                Err(e) => warn!("could not promote {}: {}", pending.btc_tx_hash, e),
            }
        }
        promoted
    }

    async fn run_duties(&self, tip: u64) -> Result<()> {
        self.sign_auths(tip)?;
        self.broadcast_ready(tip).await;
        self.confirm_reward(tip)?;
        Ok(())
    }

    /// Next local height to anchor, if the anchor condition holds at `tip`
    fn anchor_target(&self, tip: u64) -> Result<Option<(u64, BlockHash)>> {
        let frequency = self.config.frequency.max(1);
        if tip == 0 || tip % frequency != 0 {
            return Ok(None);
        }
        let target = self.state.lock().chain.head_defi_height() + frequency;
        if target > tip {
            return Ok(None);
        }

        let tip_time = self
            .chain
            .block_time_at(tip)
            .ok_or(AnchorError::UnknownBlock(tip))?;
        let target_time = self
            .chain
            .block_time_at(target)
            .ok_or(AnchorError::UnknownBlock(target))?;
        if tip_time - target_time < self.config.depth_secs {
            debug!(
                "block {} is {}s deep at tip {}, anchoring needs {}s",
                target,
                tip_time - target_time,
                tip,
                self.config.depth_secs
            );
            return Ok(None);
        }

        let hash = self
            .chain
            .block_hash_at(target)
            .ok_or(AnchorError::UnknownBlock(target))?;
        Ok(Some((target, hash)))
    }

    /// Sign an auth with every local key in the auth team at `tip`
    fn sign_auths(&self, tip: u64) -> Result<()> {
        let Some((target, block_hash)) = self.anchor_target(tip)? else {
            return Ok(());
        };
        let teams = self.selector.teams_at(self.chain.as_ref(), tip)?;
        if teams.auth.len() < self.config.quorum {
            debug!(
                "auth team of {} at height {} cannot reach quorum {}, anchoring paused",
                teams.auth.len(),
                tip,
                self.config.quorum
            );
            return Ok(());
        }

        let mut reached = None;
        {
            let mut state = self.state.lock();
            for key in self.keys.iter().filter(|k| teams.is_auth_member(&k.id())) {
                let auth = AnchorAuth::new_signed(key, target, block_hash, tip);
                match state.auths.submit(auth, &teams) {
                    Ok(Submission::Accepted { signers }) => {
                        debug!("auth by {} for block {} ({} signers)", key.id(), target, signers);
                        if signers == self.config.quorum {
                            reached = Some(signers);
                        }
                    }
                    Ok(Submission::Duplicate) => {}
                    Err(e) => warn!("own auth for block {} rejected: {}", target, e),
                }
            }
        }

        if let Some(signers) = reached {
            self.announce_auth_quorum(target, block_hash, signers);
        }
        Ok(())
    }

    fn announce_auth_quorum(&self, block_height: u64, block_hash: BlockHash, signers: usize) {
        info!(
            "auth quorum for block {} at height {} with {} signers",
            block_hash, block_height, signers
        );
        self.emit(AnchorEvent::AuthQuorumReached {
            block_height,
            block_hash,
            signers,
        });
    }

    /// Broadcast the anchor for the next target once it has auth quorum
    async fn broadcast_ready(&self, tip: u64) {
        let Some(reward_address) = self.config.reward_address.clone() else {
            return;
        };
        let frequency = self.config.frequency.max(1);

        let result = {
            let state = self.state.lock();
            let target = state.chain.head_defi_height() + frequency;
            if target > tip || state.broadcast_heights.contains(&target) {
                return;
            }
            match state.auths.quorum_reached_at(target, self.config.quorum) {
                Some(result) => result,
                None => return,
            }
        };

        let payload = AnchorPayload {
            signatures: u8::try_from(self.config.quorum).unwrap_or(u8::MAX),
            defi_block_height: result.block_height,
            creation_height: result.creation_height,
            defi_block_hash: result.block_hash,
            reward_address,
        };
        let tx = match payload
            .encode()
            .and_then(|bytes| ExternalTx::op_return(bytes).map_err(AnchorError::from))
        {
            Ok(tx) => tx,
            Err(e) => {
                warn!("cannot build anchor for block {}: {}", result.block_height, e);
                return;
            }
        };

        let btc_tx_hash = match self.spv.broadcast(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    "anchor broadcast for block {} failed: {}",
                    result.block_height, e
                );
                return;
            }
        };
        let included = match self.spv.tx_block_height(&btc_tx_hash).await {
            Ok(included) => included,
            Err(e) => {
                debug!("inclusion of {} unknown: {}", btc_tx_hash, e);
                None
            }
        };

        let defi_block_height = payload.defi_block_height;
        {
            let mut state = self.state.lock();
            state.broadcast_heights.insert(defi_block_height);
            if !state.chain.contains(&btc_tx_hash) {
                state
                    .pending
                    .observe(PendingAnchor::from_payload(btc_tx_hash, included, payload));
            }
        }

        info!(
            "anchor for block {} broadcast via {} as {}",
            defi_block_height,
            self.spv.name(),
            btc_tx_hash
        );
        self.emit(AnchorEvent::AnchorBroadcast {
            btc_tx_hash,
            defi_block_height,
        });
    }

    /// Confirm the oldest unrewarded anchor with every local confirm-team key
    fn confirm_reward(&self, tip: u64) -> Result<()> {
        let anchor = {
            let state = self.state.lock();
            match state
                .chain
                .oldest_unrewarded(state.external_height, self.config.activation_threshold)
            {
                Some(anchor) if state.queued_payout != Some(anchor.hash()) => anchor.clone(),
                _ => return Ok(()),
            }
        };

        let teams = self.selector.teams_at(self.chain.as_ref(), tip)?;
        if teams.confirm.len() < self.config.quorum {
            debug!(
                "confirm team of {} at height {} cannot reach quorum {}, rewards paused",
                teams.confirm.len(),
                tip,
                self.config.quorum
            );
            return Ok(());
        }

        let payout = {
            let mut state = self.state.lock();
            for key in self.keys.iter().filter(|k| teams.is_confirm_member(&k.id())) {
                if state.rewards.has_confirmed(&anchor.defi_block_hash, &key.id()) {
                    continue;
                }
                let conf = RewardConfirmation::new_signed(key, &anchor, tip);
                if let Err(e) = state.rewards.submit(conf, &teams, Some(&anchor)) {
                    warn!("own reward confirmation for {} rejected: {}", anchor.hash(), e);
                }
            }
            self.take_payout(&mut state, &anchor)
        };

        if let Some(payout) = payout {
            self.builder.queue_reward_payout(payout);
        }
        Ok(())
    }

    /// Build the payout for `anchor` once its confirmations reach quorum
    fn take_payout(&self, state: &mut AnchorState, anchor: &Anchor) -> Option<RewardPayout> {
        if state.queued_payout == Some(anchor.hash()) {
            return None;
        }
        let signers = state
            .rewards
            .quorum_for(&anchor.defi_block_hash, self.config.quorum)?;

        let payout = RewardPayout::for_anchor(anchor, self.pool.current());
        state.queued_payout = Some(anchor.hash());
        info!(
            "reward quorum for anchor {} with {} signers, paying {} to {}",
            anchor.hash(),
            signers,
            payout.amount,
            payout.reward_address
        );
        self.emit(AnchorEvent::RewardQuorumReached {
            anchor_hash: anchor.hash(),
            signers,
            amount: payout.amount,
        });
        Some(payout)
    }

    fn prune(&self) {
        let mut state = self.state.lock();
        let head = state.chain.head_defi_height();
        state.pending.prune(head);
        state.auths.prune_through(head);
        state.broadcast_heights.retain(|height| *height > head);
    }

    // ========================================================================
    // Listings
    // ========================================================================

    pub fn external_height(&self) -> u64 {
        self.state.lock().external_height
    }

    pub fn list_pending(&self) -> Vec<PendingView> {
        let state = self.state.lock();
        state.pending.view(state.external_height)
    }

    pub fn list_anchors(&self) -> Vec<AnchorView> {
        let state = self.state.lock();
        state
            .chain
            .view(state.external_height, self.config.activation_threshold)
    }

    pub fn list_unrewarded(&self) -> Vec<UnrewardedView> {
        let state = self.state.lock();
        state
            .chain
            .unrewarded_view(state.external_height, self.config.activation_threshold)
    }

    pub fn list_rewarded(&self) -> Vec<RewardedView> {
        self.state.lock().chain.rewarded_view()
    }

    pub fn list_auths(&self) -> Vec<AuthGroup> {
        self.state.lock().auths.list()
    }

    pub fn list_reward_confirms(&self) -> Vec<RewardConfirmGroup> {
        self.state.lock().rewards.list()
    }

    pub fn teams(&self, height: u64) -> Result<AnchorTeams> {
        self.selector.teams_at(self.chain.as_ref(), height)
    }

    pub fn community_balances(&self) -> BTreeMap<String, Amount> {
        let mut balances = BTreeMap::new();
        self.pool.balances().for_each(&mut |kind, amount| {
            balances.insert(kind.name().to_string(), amount);
            true
        });
        balances
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        let threshold = self.config.activation_threshold;
        EngineStats {
            external_height: state.external_height,
            pending: state.pending.len(),
            anchors: state.chain.len(),
            active: state
                .chain
                .active_anchors(state.external_height, threshold)
                .len(),
            rewarded: state.chain.rewarded().len(),
            reward_pool: self.pool.current(),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn snapshot(&self) -> AnchorSnapshot {
        let local_height = self.chain.current_height();
        let state = self.state.lock();
        let mut balances = Vec::new();
        self.pool.balances().for_each(&mut |kind, amount| {
            balances.push((kind, amount));
            true
        });
        AnchorSnapshot {
            local_height,
            anchors: state.chain.iter().cloned().collect(),
            pending: state.pending.iter().cloned().collect(),
            external_height: state.external_height,
            balances,
        }
    }

    /// Replace anchor state with a snapshot, re-checking chain linkage
    pub fn restore(&self, snapshot: AnchorSnapshot) -> Result<()> {
        let mut chain = AnchorChain::new();
        for anchor in snapshot.anchors {
            chain.append(anchor)?;
        }
        let mut pending = PendingTracker::new();
        for entry in snapshot.pending {
            pending.observe(entry);
        }
        for (kind, amount) in &snapshot.balances {
            self.pool.balances().set(*kind, *amount)?;
        }

        let mut state = self.state.lock();
        info!(
            "restored {} anchors and {} pending at external height {}",
            chain.len(),
            pending.len(),
            snapshot.external_height
        );
        state.chain = chain;
        state.pending = pending;
        state.external_height = snapshot.external_height;
        state.queued_payout = None;
        state.broadcast_heights.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::MinedPayout;
    use anchorage_bridge::FakeSpv;
    use anchorage_core::Hash256;
    use anchorage_economics::{AnchorRewardSchedule, CommunityBalanceRegister};

    const STEP_SECS: i64 = 1000;
    const ADDRESS: &str = "mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU";

    /// Local chain with one block every `STEP_SECS`
    struct TestChain {
        blocks: Mutex<Vec<(BlockHash, i64)>>,
        minters: Vec<ValidatorId>,
    }

    impl TestChain {
        fn new(minters: Vec<ValidatorId>) -> Self {
            Self {
                blocks: Mutex::new(vec![(Hash256::from_content(b"genesis"), 0)]),
                minters,
            }
        }

        fn mint(&self, payouts: Vec<MinedPayout>) -> ConnectedBlock {
            let mut blocks = self.blocks.lock();
            let height = blocks.len() as u64;
            let hash = Hash256::from_content(&height.to_le_bytes());
            let time = height as i64 * STEP_SECS;
            blocks.push((hash, time));
            ConnectedBlock {
                height,
                hash,
                time,
                payouts,
            }
        }
    }

    impl ChainReader for TestChain {
        fn current_height(&self) -> u64 {
            self.blocks.lock().len() as u64 - 1
        }

        fn block_hash_at(&self, height: u64) -> Option<BlockHash> {
            self.blocks.lock().get(height as usize).map(|b| b.0)
        }

        fn block_time_at(&self, height: u64) -> Option<i64> {
            self.blocks.lock().get(height as usize).map(|b| b.1)
        }

        fn validators_minted_since(&self, _height: u64, _window_secs: i64) -> Vec<ValidatorId> {
            self.minters.clone()
        }
    }

    #[derive(Default)]
    struct TestBuilder {
        queued: Mutex<Vec<RewardPayout>>,
    }

    impl BlockBuilder for TestBuilder {
        fn queue_reward_payout(&self, payout: RewardPayout) {
            self.queued.lock().push(payout);
        }
    }

    struct Harness {
        engine: FinalityEngine,
        chain: Arc<TestChain>,
        builder: Arc<TestBuilder>,
        spv: Arc<FakeSpv>,
    }

    impl Harness {
        fn new(config: FinalityConfig, local_keys: usize) -> Self {
            let keys: Vec<ValidatorKey> = (1..=3u8).map(|i| ValidatorKey::from_seed([i; 32])).collect();
            let chain = Arc::new(TestChain::new(keys.iter().map(|k| k.id()).collect()));
            let builder = Arc::new(TestBuilder::default());
            let spv = Arc::new(FakeSpv::new(15));
            let pool = AnchorRewardPool::new(
                Arc::new(CommunityBalanceRegister::new()),
                AnchorRewardSchedule::default(),
            );
            let engine = FinalityEngine::new(
                config,
                chain.clone(),
                builder.clone(),
                spv.clone(),
                pool,
                keys.into_iter().take(local_keys).collect(),
            );
            Self {
                engine,
                chain,
                builder,
                spv,
            }
        }

        async fn mint_to(&self, height: u64) {
            while self.chain.current_height() < height {
                let block = self.chain.mint(Vec::new());
                self.engine.on_block_connected(block).await.unwrap();
            }
        }
    }

    fn config() -> FinalityConfig {
        FinalityConfig {
            reward_address: Some(ADDRESS.to_string()),
            ..FinalityConfig::default()
        }
    }

    #[tokio::test]
    async fn test_no_auth_before_depth() {
        let h = Harness::new(config(), 3);
        h.mint_to(15).await;

        // block 15 is not three hours deep at tip 15
        assert!(h.engine.list_auths().is_empty());
        assert!(h.engine.list_pending().is_empty());
    }

    #[tokio::test]
    async fn test_anchor_lifecycle() {
        let h = Harness::new(config(), 3);
        let mut events = h.engine.subscribe();
        h.mint_to(30).await;

        let auths = h.engine.list_auths();
        assert_eq!(auths.len(), 1);
        assert_eq!(auths[0].block_height, 15);
        assert_eq!(auths[0].signers, 3);

        let pending = h.engine.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].btc_block_height, Some(15));
        assert_eq!(pending[0].confirmations, 1);
        assert_eq!(pending[0].signatures, 3);
        assert_eq!(pending[0].anchor_creation_height, 30);

        assert!(matches!(
            events.recv().await.unwrap(),
            AnchorEvent::AuthQuorumReached { block_height: 15, signers: 3, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            AnchorEvent::AnchorBroadcast { defi_block_height: 15, .. }
        ));

        h.mint_to(31).await;
        assert!(h.engine.list_pending().is_empty());
        let anchors = h.engine.list_anchors();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].anchor.previous_anchor, Hash256::ZERO);
        assert!(!anchors[0].active);

        h.spv.set_last_height(19);
        h.engine.poll_external().await.unwrap();
        assert_eq!(h.engine.list_anchors()[0].confirmations, 5);
        assert!(h.engine.list_unrewarded().is_empty());
        assert!(h.builder.queued.lock().is_empty());

        h.spv.set_last_height(20);
        h.engine.poll_external().await.unwrap();
        assert!(h.engine.list_anchors()[0].active);
        assert_eq!(h.engine.list_unrewarded().len(), 1);

        let payout = h.builder.queued.lock()[0].clone();
        assert_eq!(payout.amount.to_string(), "3.10000000");
        assert_eq!(payout.reward_address, ADDRESS);
        assert_eq!(h.engine.list_reward_confirms()[0].signers, 3);

        // quorum already queued: polling again does not queue twice
        h.engine.poll_external().await.unwrap();
        assert_eq!(h.builder.queued.lock().len(), 1);

        let txid = Hash256::from_content(b"payout");
        let block = h.chain.mint(vec![MinedPayout {
            txid,
            payout: payout.clone(),
        }]);
        h.engine.on_block_connected(block.clone()).await.unwrap();

        assert_eq!(h.engine.stats().reward_pool.to_string(), "0.10000000");
        assert!(h.engine.list_unrewarded().is_empty());
        assert!(h.engine.list_reward_confirms().is_empty());
        let rewarded = h.engine.list_rewarded();
        assert_eq!(rewarded.len(), 1);
        assert_eq!(rewarded[0].anchor_height, 15);
        assert_eq!(rewarded[0].dfi_reward_hash, txid);

        h.engine.on_block_disconnected(&block).unwrap();
        assert!(h.engine.list_rewarded().is_empty());
        assert_eq!(h.engine.stats().reward_pool.to_string(), "3.10000000");
    }

    #[tokio::test]
    async fn test_second_anchor_links_to_first() {
        let h = Harness::new(config(), 3);
        h.mint_to(46).await;

        let anchors = h.engine.list_anchors();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[1].anchor.defi_block_height, 30);
        assert_eq!(anchors[1].anchor.previous_anchor, anchors[0].anchor.hash());
        assert_eq!(anchors[1].anchor.creation_height, 45);
    }

    #[tokio::test]
    async fn test_signatures_carry_quorum() {
        let h = Harness::new(
            FinalityConfig {
                quorum: 2,
                ..config()
            },
            3,
        );
        h.mint_to(30).await;

        assert_eq!(h.engine.list_auths()[0].signers, 3);
        assert_eq!(h.engine.list_pending()[0].signatures, 2);
    }

    #[tokio::test]
    async fn test_short_team_pauses_anchoring() {
        let h = Harness::new(
            FinalityConfig {
                team_size: 2,
                ..config()
            },
            3,
        );
        h.mint_to(45).await;

        assert!(h.engine.list_auths().is_empty());
        assert!(h.engine.list_anchors().is_empty());
    }

    #[tokio::test]
    async fn test_without_reward_address_only_signs() {
        let h = Harness::new(FinalityConfig::default(), 3);
        h.mint_to(30).await;

        assert_eq!(h.engine.list_auths()[0].signers, 3);
        assert!(h.engine.list_pending().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_outage_retries_broadcast() {
        let h = Harness::new(config(), 3);
        h.spv.set_reachable(false);
        h.mint_to(30).await;

        assert_eq!(h.engine.list_auths()[0].signers, 3);
        assert!(h.engine.list_pending().is_empty());

        h.spv.set_reachable(true);
        h.mint_to(31).await;
        assert_eq!(h.engine.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_auths_reach_quorum() {
        let h = Harness::new(config(), 1);
        h.mint_to(30).await;

        let group = &h.engine.list_auths()[0];
        assert_eq!(group.signers, 1);
        let (height, hash) = (group.block_height, group.block_hash);
        assert!(h.engine.list_pending().is_empty());

        for seed in 2..=3u8 {
            let key = ValidatorKey::from_seed([seed; 32]);
            let auth = AnchorAuth::new_signed(&key, height, hash, 30);
            assert!(matches!(
                h.engine.submit_auth(auth).await.unwrap(),
                Submission::Accepted { .. }
            ));
        }

        assert_eq!(h.engine.list_auths()[0].signers, 3);
        assert_eq!(h.engine.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn test_outsider_auth_rejected() {
        let h = Harness::new(config(), 3);
        h.mint_to(30).await;

        let outsider = ValidatorKey::from_seed([9; 32]);
        let auth = AnchorAuth::new_signed(&outsider, 30, Hash256::new([1; 32]), 30);
        assert!(matches!(
            h.engine.submit_auth(auth).await,
            Err(AnchorError::IneligibleSigner { .. })
        ));
    }

    #[tokio::test]
    async fn test_observe_anchor_tx() {
        let h = Harness::new(FinalityConfig::default(), 0);
        h.mint_to(20).await;

        let payload = AnchorPayload {
            signatures: 3,
            defi_block_height: 15,
            creation_height: 20,
            defi_block_hash: h.chain.block_hash_at(15).unwrap(),
            reward_address: ADDRESS.to_string(),
        };
        let bytes = payload.encode().unwrap();
        let tx = Hash256::from_content(&bytes);

        assert!(h.engine.observe_anchor_tx(tx, &bytes, Some(15)).unwrap());
        assert!(!h.engine.observe_anchor_tx(tx, &bytes, Some(15)).unwrap());

        let forged = AnchorPayload {
            defi_block_hash: Hash256::new([7; 32]),
            ..payload
        };
        assert_eq!(
            h.engine
                .observe_anchor_tx(Hash256::new([8; 32]), &forged.encode().unwrap(), None),
            Err(AnchorError::UnknownBlock(15))
        );

        h.spv.set_tx_height(tx, Some(15));
        h.mint_to(21).await;
        assert_eq!(h.engine.list_anchors().len(), 1);
        assert!(matches!(
            h.engine
                .observe_anchor_tx(Hash256::new([9; 32]), &bytes, Some(16)),
            Err(AnchorError::StaleAnchor { defi_height: 15, head_height: 15 })
        ));
    }

    #[tokio::test]
    async fn test_late_inclusion_is_promoted() {
        let h = Harness::new(config(), 3);
        h.mint_to(30).await;
        let tx = h.engine.list_pending()[0].btc_tx_hash;

        // dropped from the external chain and left out for a long while
        h.spv.set_tx_height(tx, None);
        h.mint_to(130).await;
        let pending = h.engine.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].btc_block_height, None);
        assert_eq!(pending[0].confirmations, 0);
        assert!(h.engine.list_anchors().is_empty());

        h.spv.set_last_height(16);
        h.spv.set_tx_height(tx, Some(16));
        h.mint_to(131).await;
        assert!(h.engine.list_pending().is_empty());
        let anchors = h.engine.list_anchors();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].anchor.btc_tx_hash, tx);
        assert_eq!(anchors[0].anchor.btc_block_height, 16);
    }

    #[tokio::test]
    async fn test_external_reorg_lowers_pending_confirmations() {
        let h = Harness::new(config(), 3);
        h.mint_to(30).await;
        assert_eq!(h.engine.list_pending()[0].confirmations, 1);

        h.spv.reorg_to(14);
        h.engine.poll_external().await.unwrap();
        let pending = h.engine.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].btc_block_height, None);
        assert_eq!(pending[0].confirmations, 0);
        assert!(h.engine.list_anchors().is_empty());

        h.spv.set_last_height(15);
        h.spv.set_tx_height(pending[0].btc_tx_hash, Some(15));
        h.engine.poll_external().await.unwrap();
        assert_eq!(h.engine.list_anchors().len(), 1);
    }

    #[tokio::test]
    async fn test_reobserve_promoted_anchor_is_noop() {
        let h = Harness::new(config(), 3);
        h.mint_to(31).await;
        let anchor = h.engine.snapshot().anchors[0].clone();
        let bytes = AnchorPayload {
            signatures: 3,
            defi_block_height: anchor.defi_block_height,
            creation_height: anchor.creation_height,
            defi_block_hash: anchor.defi_block_hash,
            reward_address: anchor.reward_address.clone(),
        }
        .encode()
        .unwrap();
        let before = h.engine.snapshot();

        assert!(!h
            .engine
            .observe_anchor_tx(anchor.btc_tx_hash, &bytes, Some(15))
            .unwrap());
        assert!(h.engine.list_pending().is_empty());
        assert_eq!(h.engine.snapshot(), before);
    }

    #[tokio::test]
    async fn test_payout_for_inactive_anchor_is_ignored() {
        let h = Harness::new(config(), 3);
        h.mint_to(31).await;
        let anchor = h.engine.snapshot().anchors[0].clone();
        assert!(!h.engine.list_anchors()[0].active);

        let payout = RewardPayout::for_anchor(&anchor, Amount::from_sat(310_000_000));
        let block = h.chain.mint(vec![MinedPayout {
            txid: Hash256::from_content(b"early payout"),
            payout,
        }]);
        h.engine.on_block_connected(block).await.unwrap();

        assert!(h.engine.list_rewarded().is_empty());
        assert_eq!(h.engine.snapshot().anchors[0].dfi_reward_hash, None);
        assert_eq!(h.engine.stats().reward_pool.to_string(), "3.20000000");
    }

    #[tokio::test]
    async fn test_disconnect_before_payout_is_mined() {
        let h = Harness::new(config(), 3);
        h.mint_to(31).await;
        h.spv.set_last_height(20);
        let block = h.chain.mint(Vec::new());
        h.engine.on_block_connected(block.clone()).await.unwrap();
        let stale = h.builder.queued.lock()[0].clone();
        assert_eq!(stale.amount.to_string(), "3.20000000");

        h.engine.on_block_disconnected(&block).unwrap();
        assert_eq!(h.engine.stats().reward_pool.to_string(), "3.10000000");
        let requeued = h.builder.queued.lock().last().cloned().unwrap();
        assert_eq!(requeued.anchor_hash, stale.anchor_hash);
        assert_eq!(requeued.amount.to_string(), "3.10000000");

        // a builder that still mines the old amount is refused, the block still accrues
        let block = h.chain.mint(vec![MinedPayout {
            txid: Hash256::from_content(b"stale payout"),
            payout: stale,
        }]);
        h.engine.on_block_connected(block).await.unwrap();
        assert!(h.engine.list_rewarded().is_empty());
        assert_eq!(h.engine.stats().reward_pool.to_string(), "3.20000000");

        let fresh = h.builder.queued.lock().last().cloned().unwrap();
        assert_eq!(fresh.amount.to_string(), "3.20000000");
        let block = h.chain.mint(vec![MinedPayout {
            txid: Hash256::from_content(b"fresh payout"),
            payout: fresh,
        }]);
        h.engine.on_block_connected(block).await.unwrap();
        assert_eq!(h.engine.list_rewarded().len(), 1);
        assert_eq!(h.engine.stats().reward_pool.to_string(), "0.10000000");
    }

    #[tokio::test]
    async fn test_reward_confirmation_for_inactive_anchor() {
        let h = Harness::new(config(), 3);
        h.mint_to(31).await;

        let anchor = h.engine.snapshot().anchors[0].clone();
        let key = ValidatorKey::from_seed([1; 32]);
        let conf = RewardConfirmation::new_signed(&key, &anchor, 31);

        assert_eq!(
            h.engine.submit_reward_confirmation(conf),
            Err(AnchorError::NotRewardable(anchor.btc_tx_hash))
        );
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let h = Harness::new(config(), 3);
        h.mint_to(31).await;
        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.anchors.len(), 1);

        let restored = Harness::new(config(), 3);
        while restored.chain.current_height() < snapshot.local_height {
            restored.chain.mint(Vec::new());
        }
        restored.engine.restore(snapshot.clone()).unwrap();

        assert_eq!(restored.engine.list_anchors(), h.engine.list_anchors());
        assert_eq!(restored.engine.stats().reward_pool.to_string(), "3.10000000");
        assert_eq!(restored.engine.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_restore_rejects_broken_linkage() {
        let h = Harness::new(config(), 3);
        h.mint_to(46).await;
        let mut snapshot = h.engine.snapshot();
        snapshot.anchors.remove(0);

        let restored = Harness::new(config(), 3);
        assert!(matches!(
            restored.engine.restore(snapshot),
            Err(AnchorError::LinkageViolation { .. })
        ));
    }
}
