use super::message::{NodeState, Value};

/// The healthy part of one poll: peers that answered, participate, and have not been stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerObservation {
    pub healthy: Vec<(usize, NodeState)>,
    pub ones: usize,
    pub zeros: usize,
}

impl PeerObservation {
    pub fn from_responses(responses: Vec<(usize, Option<NodeState>)>) -> Self {
        let healthy: Vec<(usize, NodeState)> = responses
            .into_iter()
            .filter_map(|(index, state)| state.map(|state| (index, state)))
            .filter(|(_, state)| state.is_healthy())
            .collect();

        let ones = healthy.iter().filter(|(_, s)| s.x == Some(Value::One)).count();
        let zeros = healthy.iter().filter(|(_, s)| s.x == Some(Value::Zero)).count();

        PeerObservation { healthy, ones, zeros }
    }

    /// Plurality of observed values. Ties, including an empty poll, go to 1.
    pub fn plurality(&self) -> Value {
        if self.ones >= self.zeros {
            Value::One
        } else {
            Value::Zero
        }
    }
}
