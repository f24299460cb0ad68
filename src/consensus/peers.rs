use crate::common::{
    config::NetworkConfig,
    error::{NodeError, Result},
};

/// Maps node indices to reachable base URLs: node `i` listens on `base_port + i`.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    host: String,
    base_port: u16,
    size: usize,
}

impl PeerDirectory {
    pub fn new(host: impl Into<String>, base_port: u16, size: usize) -> Self {
        PeerDirectory {
            host: host.into(),
            base_port,
            size,
        }
    }

    pub fn from_config(config: &NetworkConfig, size: usize) -> Self {
        PeerDirectory::new(config.host.clone(), config.base_port, size)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Fails unless every index below `len` has its own port.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.port_of(self.size - 1).is_some() {
            return Ok(());
        }
        Err(NodeError::PortRange {
            base_port: self.base_port,
            nodes: self.size,
        })
    }

    /// `None` when `base_port + index` does not fit in a port number.
    pub fn port_of(&self, index: usize) -> Option<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|index| self.base_port.checked_add(index))
    }

    pub fn address_of(&self, index: usize) -> Option<String> {
        self.port_of(index)
            .map(|port| format!("http://{}:{}", self.host, port))
    }

    /// Every addressable node except `node_id`, in index order.
    pub fn others(&self, node_id: usize) -> impl Iterator<Item = (usize, String)> + '_ {
        (0..self.size)
            .filter(move |index| *index != node_id)
            .filter_map(move |index| self.address_of(index).map(|address| (index, address)))
    }
}
