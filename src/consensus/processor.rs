use std::sync::Arc;

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    client::{poll_peers, HttpPeerClient, PeerClient},
    message::{NodeState, PeerMessage},
    peers::PeerDirectory,
    store::StateStore,
    tally::PeerObservation,
};
use crate::common::{
    config::{NetworkConfig, RunConfig, QUIET_AFTER_ROUND, ROUND_CAP},
    error::{ConsensusError, Result},
};

/*
    A run starts with a single poll of every other node. When the assumed
    fault bound is below half the network (F < N/2) the plurality of the
    healthy answers is safe to adopt at once, and the node decides with
    k = 2. Otherwise the node falls back to periodic rounds: k advances on
    every tick, rounds past 10 only log, and the loop cancels itself once
    k passes 11. The fallback never decides.

    Only silent faults are tolerated. A peer that reports a well-formed but
    false value is counted like any other.

    TODO: exchange phase votes over /message so the fallback can terminate
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Idle,
    Polling,
    RoundLoop,
    Decided,
    Capped,
    Killed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StartOutcome {
    Started,
    AlreadyStarted,
}

/// Handle on the periodic round task. Cancelling more than once is a no-op.
struct RoundTask {
    cancel: CancellationToken,
}

impl RoundTask {
    fn cancel(&self) {
        self.cancel.cancel();
    }
}

enum RunSlot {
    Idle,
    Polling,
    RoundLoop(RoundTask),
    Decided,
    Capped,
    Killed,
}

impl RunSlot {
    fn phase(&self) -> Phase {
        match self {
            RunSlot::Idle => Phase::Idle,
            RunSlot::Polling => Phase::Polling,
            RunSlot::RoundLoop(_) => Phase::RoundLoop,
            RunSlot::Decided => Phase::Decided,
            RunSlot::Capped => Phase::Capped,
            RunSlot::Killed => Phase::Killed,
        }
    }
}

pub struct ConsensusProcessor {
    config: RunConfig,
    network: NetworkConfig,
    peers: PeerDirectory,
    client: Arc<dyn PeerClient>,
    store: StateStore,
    run: Arc<Mutex<RunSlot>>,
}

impl ConsensusProcessor {
    pub fn new(config: RunConfig, network: NetworkConfig, client: Arc<dyn PeerClient>) -> Self {
        let peers = PeerDirectory::from_config(&network, config.n);
        let store = StateStore::new(NodeState::initial(&config));
        ConsensusProcessor {
            config,
            network,
            peers,
            client,
            store,
            run: Arc::new(Mutex::new(RunSlot::Idle)),
        }
    }

    /// Processor that polls its peers over HTTP with the configured timeout.
    pub fn over_http(config: RunConfig, network: NetworkConfig) -> Result<Self> {
        let client = HttpPeerClient::new(network.poll_timeout)?;
        Ok(ConsensusProcessor::new(config, network, Arc::new(client)))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    /// Read-only handle on this node's state.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn state(&self) -> NodeState {
        self.store.read().await
    }

    pub async fn phase(&self) -> Phase {
        self.run.lock().await.phase()
    }

    pub async fn start(&self) -> Result<StartOutcome, ConsensusError> {
        let node = self.config.node_id;
        {
            let mut run = self.run.lock().await;
            if self.config.is_faulty {
                warn!(node, "refusing to start consensus on a faulty node");
                return Err(ConsensusError::FaultyNode);
            }
            match *run {
                RunSlot::Idle => {}
                RunSlot::Killed => {
                    warn!(node, "refusing to start consensus on a stopped node");
                    return Err(ConsensusError::Killed);
                }
                _ => {
                    debug!(node, phase = ?run.phase(), "consensus already started");
                    return Ok(StartOutcome::AlreadyStarted);
                }
            }
            *run = RunSlot::Polling;
        }

        let responses = poll_peers(
            self.client.as_ref(),
            self.peers.others(node),
            self.network.poll_timeout,
        )
        .await;
        let observation = PeerObservation::from_responses(responses);
        info!(
            node,
            ones = observation.ones,
            zeros = observation.zeros,
            healthy = observation.healthy.len(),
            "polled peers"
        );

        let mut run = self.run.lock().await;
        if matches!(*run, RunSlot::Polling) == false {
            debug!(node, "stopped while polling, discarding poll");
            return Ok(StartOutcome::Started);
        }

        if self.config.allows_single_shot() {
            let decision = observation.plurality();
            if self.store.write(|state| state.decide(decision)).await {
                info!(node, decision = %decision, "decided");
            } else {
                warn!(node, decision = %decision, "state already frozen, decision not applied");
            }
            *run = RunSlot::Decided;
        } else {
            let k = self.store.write(|state| state.enter_rounds()).await;
            info!(
                node,
                round = ?k,
                f = self.config.f,
                n = self.config.n,
                "fault bound too high for a single exchange, entering round loop"
            );
            *run = RunSlot::RoundLoop(self.spawn_rounds());
        }

        Ok(StartOutcome::Started)
    }

    /// Cancels any round task and marks the node killed. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let RunSlot::RoundLoop(task) = std::mem::replace(&mut *run, RunSlot::Killed) {
            task.cancel();
        }
        self.store.write(|state| state.kill()).await;
        info!(node = self.config.node_id, "consensus stopped");
    }

    pub async fn on_message(&self, message: PeerMessage) {
        info!(
            node = self.config.node_id,
            from = ?message.from,
            round = ?message.round,
            phase = ?message.phase,
            x = ?message.x,
            "received message"
        );
        if message.extra.is_empty() == false {
            debug!(node = self.config.node_id, extra = ?message.extra, "message carries extra fields");
        }
    }

    fn spawn_rounds(&self) -> RoundTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let store = self.store.clone();
        let run = self.run.clone();
        let period = self.network.round_period;
        let node = self.config.node_id;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(node, "round loop cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let advanced = store
                    .write(|state| {
                        if token.is_cancelled() {
                            None
                        } else {
                            state.advance_round()
                        }
                    })
                    .await;
                let Some(k) = advanced else {
                    return;
                };

                info!(node, round = k, "round");
                if k > QUIET_AFTER_ROUND {
                    info!(node, round = k, "continuing without decision");
                }

                if k > ROUND_CAP {
                    token.cancel();
                    let mut run = run.lock().await;
                    if matches!(*run, RunSlot::RoundLoop(_)) {
                        *run = RunSlot::Capped;
                    }
                    info!(node, round = k, "round cap reached, round loop stopped");
                    return;
                }
            }
        });

        RoundTask { cancel }
    }
}
