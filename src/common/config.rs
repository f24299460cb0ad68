use std::time::Duration;

use crate::{
    common::error::{NodeError, Result},
    consensus::message::Value,
};

pub const BASE_NODE_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_ROUND_PERIOD: Duration = Duration::from_millis(200);

/// Rounds above this keep ticking but only log that no decision is taken.
pub const QUIET_AFTER_ROUND: u64 = 10;
/// The round loop is cancelled as soon as `k` exceeds this.
pub const ROUND_CAP: u64 = 11;

/// Identity and protocol parameters of one node. Fixed for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub node_id: usize,
    pub n: usize,
    pub f: usize,
    pub is_faulty: bool,
    pub initial_value: Value,
}

impl RunConfig {
    pub fn new(node_id: usize, n: usize, f: usize, initial_value: Value, is_faulty: bool) -> Self {
        RunConfig {
            node_id,
            n,
            f,
            is_faulty,
            initial_value,
        }
    }

    /// A node needs a non-empty network that actually contains it.
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(NodeError::InvalidConfig("a network needs at least one node".to_string()));
        }
        if self.node_id >= self.n {
            return Err(NodeError::InvalidConfig(format!(
                "node id {} is outside a network of {} nodes",
                self.node_id, self.n
            )));
        }
        Ok(())
    }

    /// `F < N/2`: a single exchange is enough to settle on the plurality.
    pub fn allows_single_shot(&self) -> bool {
        self.f.saturating_mul(2) < self.n
    }
}

/// Where nodes live and how long the engine is willing to wait on them.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub host: String,
    pub base_port: u16,
    pub poll_timeout: Duration,
    pub round_period: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: DEFAULT_HOST.to_string(),
            base_port: BASE_NODE_PORT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            round_period: DEFAULT_ROUND_PERIOD,
        }
    }
}

impl NetworkConfig {
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_round_period(mut self, round_period: Duration) -> Self {
        self.round_period = round_period;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_shot_threshold() {
        assert!(RunConfig::new(0, 4, 1, Value::One, false).allows_single_shot());
        assert!(RunConfig::new(0, 5, 2, Value::One, false).allows_single_shot());
        // F == N/2 is not strictly below the bound
        assert!(!RunConfig::new(0, 4, 2, Value::One, false).allows_single_shot());
        assert!(!RunConfig::new(0, 3, 2, Value::Zero, false).allows_single_shot());
        assert!(!RunConfig::new(0, 3, usize::MAX, Value::Zero, false).allows_single_shot());
    }

    #[test]
    fn test_node_must_belong_to_network() {
        assert!(RunConfig::new(0, 1, 0, Value::One, false).validate().is_ok());
        assert!(RunConfig::new(3, 4, 1, Value::One, false).validate().is_ok());

        assert!(matches!(
            RunConfig::new(0, 0, 0, Value::One, false).validate(),
            Err(NodeError::InvalidConfig(_))
        ));
        assert!(matches!(
            RunConfig::new(4, 4, 1, Value::One, false).validate(),
            Err(NodeError::InvalidConfig(_))
        ));
    }
}
