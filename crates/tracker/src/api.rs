use common::config::Api;
use common::http::{CallOutcome, ResilientHttpClient};
use common::types::ConnectRequest;
use std::future::Future;

/// The two leaderboard calls a wallet resolution needs. Implementations are
/// expected to handle retries themselves; the resolver never retries.
pub trait PointsApi {
    fn connect(&self, wallet: &str) -> impl Future<Output = CallOutcome> + Send;

    fn fetch_points(&self, record_id: &str) -> impl Future<Output = CallOutcome> + Send;
}

pub struct LeaderboardClient {
    http: ResilientHttpClient,
    api: Api,
    connect_url: String,
}

impl LeaderboardClient {
    pub fn new(http: ResilientHttpClient, api: &Api) -> Self {
        Self {
            http,
            api: api.clone(),
            connect_url: api.connect_url(),
        }
    }

    /// Record ids are opaque, so they are percent-encoded into the path.
    pub fn points_url(&self, record_id: &str) -> String {
        self.api.points_url(&urlencoding::encode(record_id))
    }
}

impl PointsApi for LeaderboardClient {
    async fn connect(&self, wallet: &str) -> CallOutcome {
        let body = match serde_json::to_value(ConnectRequest::for_wallet(wallet)) {
            Ok(v) => v,
            Err(e) => {
                return CallOutcome::PermanentFailure(common::http::CallError::Decode(
                    e.to_string(),
                ))
            }
        };
        self.http.post_json("connect", &self.connect_url, &body).await
    }

    async fn fetch_points(&self, record_id: &str) -> CallOutcome {
        let url = self.points_url(record_id);
        self.http.get_json("points", &url).await
    }
}
