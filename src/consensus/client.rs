use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use super::message::NodeState;
use crate::common::error::Result;

/// Reads a peer's published state.
///
/// Implementations fold every failure into `None`; a peer that cannot be
/// read is simply left out of the tally.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch_state(&self, address: &str) -> Option<NodeState>;
}

/// Queries `GET {address}/getState` over HTTP.
#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(HttpPeerClient { http })
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        HttpPeerClient { http }
    }

    async fn get_state(&self, address: &str) -> Result<NodeState, reqwest::Error> {
        self.http
            .get(format!("{address}/getState"))
            .send()
            .await?
            .error_for_status()?
            .json::<NodeState>()
            .await
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_state(&self, address: &str) -> Option<NodeState> {
        match self.get_state(address).await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(peer = address, error = %e, "peer state unavailable");
                None
            }
        }
    }
}

/// Queries every peer concurrently and waits for all of them, each bounded by `timeout`.
///
/// Results come back in the order the peers were given.
pub async fn poll_peers<I>(
    client: &dyn PeerClient,
    peers: I,
    timeout: Duration,
) -> Vec<(usize, Option<NodeState>)>
where
    I: IntoIterator<Item = (usize, String)>,
{
    let queries = peers.into_iter().map(|(index, address)| async move {
        match tokio::time::timeout(timeout, client.fetch_state(&address)).await {
            Ok(state) => (index, state),
            Err(_) => {
                debug!(peer = index, "peer timed out");
                (index, None)
            }
        }
    });
    join_all(queries).await
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use axum::{routing::get, Json, Router};
    use tokio::net::TcpListener;

    use super::{
        mock::{MockPeer, MockPeerClient},
        *,
    };
    use crate::{
        common::config::RunConfig,
        consensus::{message::Value, peers::PeerDirectory},
    };

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn state(value: Value) -> NodeState {
        NodeState::initial(&RunConfig::new(1, 3, 1, value, false))
    }

    #[tokio::test]
    async fn test_fetch_valid_state() {
        let expected = state(Value::One);
        let body = expected.clone();
        let address = serve(Router::new().route("/getState", get(move || async move { Json(body) }))).await;

        let client = HttpPeerClient::new(Duration::from_secs(1)).unwrap();
        assert_eq!(client.fetch_state(&address).await, Some(expected));
    }

    #[tokio::test]
    async fn test_malformed_state_is_unknown() {
        let address = serve(Router::new().route(
            "/getState",
            get(|| async { Json(serde_json::json!({ "x": 7, "killed": "no" })) }),
        ))
        .await;

        let client = HttpPeerClient::new(Duration::from_secs(1)).unwrap();
        assert_eq!(client.fetch_state(&address).await, None);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_unknown() {
        // Bind then drop so nothing is listening on the port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        assert_eq!(client.fetch_state(&format!("http://{addr}")).await, None);
    }

    #[tokio::test]
    async fn test_poll_is_bounded_by_timeout() {
        let directory = PeerDirectory::new("mock", 5000, 4);
        let client = MockPeerClient::new(
            &directory,
            vec![
                (1, MockPeer::State(state(Value::Zero))),
                (2, MockPeer::Hang),
                (3, MockPeer::Down),
            ],
        );

        let started = Instant::now();
        let results = poll_peers(&client, directory.others(0), Duration::from_millis(100)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.calls(), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], (1, Some(state(Value::Zero))));
        assert_eq!(results[1], (2, None));
        assert_eq!(results[2], (3, None));
    }
}
