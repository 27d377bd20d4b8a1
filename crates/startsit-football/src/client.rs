// HTTP adapter for the statistics service.
//
//   GET {base}/players/{player_id}/stats?season=&week=
//   GET {base}/teams/{team_id}/defense?season=&week=
//
// Ids are percent-encoded as single path segments. Each request carries
// its own timeout. Non-2xx statuses and undecodable
// bodies are mapped onto `UpstreamError`; nothing partial is ever returned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use startsit_core::config::Config;
use startsit_core::UpstreamError;
use tracing::debug;

use crate::stats::{DefenseBundle, StatsBundle, StatsProvider};

const SERVICE: &str = "stats";

pub struct HttpStatsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpStatsClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stats.base_url.clone(),
            config.credentials.stats_api_key.clone(),
            config.stats.timeout(),
        )
    }

    /// `base_url` with `segments` appended, each encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            UpstreamError::rejected(SERVICE, format!("invalid base url {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                let reason = format!("base url {} cannot take a path", self.base_url);
                UpstreamError::rejected(SERVICE, reason)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        season: u16,
        week: u8,
    ) -> Result<T, UpstreamError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let mut request = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .query(&[("season", season.to_string()), ("week", week.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "stats request failed");
            return Err(status_error(status));
        }

        let body = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&body)
            .map_err(|e| UpstreamError::invalid_response(SERVICE, format!("{path}: {e}")))
    }

    fn transport_error(&self, err: &reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::timeout(SERVICE, self.timeout)
        } else {
            UpstreamError::unavailable(SERVICE, format!("network error: {err}"))
        }
    }
}

/// 429 and 5xx are transient; any other status (404 included) means the
/// same request will keep failing.
fn status_error(status: reqwest::StatusCode) -> UpstreamError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        UpstreamError::unavailable(SERVICE, format!("status {status}"))
    } else {
        UpstreamError::rejected(SERVICE, format!("status {status}"))
    }
}

#[async_trait]
impl StatsProvider for HttpStatsClient {
    async fn fetch_player_stats(
        &self,
        player_id: &str,
        season: u16,
        week: u8,
    ) -> Result<StatsBundle, UpstreamError> {
        let bundle: StatsBundle = self
            .get_json(&["players", player_id, "stats"], season, week)
            .await?;
        if bundle.player_id != player_id {
            return Err(UpstreamError::invalid_response(
                SERVICE,
                format!("asked for player {player_id}, got {}", bundle.player_id),
            ));
        }
        Ok(bundle)
    }

    async fn fetch_defense_stats(
        &self,
        team_id: &str,
        season: u16,
        week: u8,
    ) -> Result<DefenseBundle, UpstreamError> {
        let bundle: DefenseBundle = self
            .get_json(&["teams", team_id, "defense"], season, week)
            .await?;
        if bundle.team_id != team_id {
            return Err(UpstreamError::invalid_response(
                SERVICE,
                format!("asked for team {team_id}, got {}", bundle.team_id),
            ));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use startsit_core::model::Position;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpStatsClient {
        HttpStatsClient::new(server.uri(), Some("stats-key".into()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn fetches_player_stats_with_query_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players/P1/stats"))
            .and(query_param("season", "2024"))
            .and(query_param("week", "5"))
            .and(header("x-api-key", "stats-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "player_id": "P1",
                "name": "Test Receiver",
                "position": "WR",
                "team_id": "BUF",
                "games_played": 4,
                "advanced": {"avg_separation": 3.4, "target_share": 0.26},
                "weather": {"dome": false, "wind_mph": 8.0, "precipitation": "light"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let bundle = client(&server).fetch_player_stats("P1", 2024, 5).await.unwrap();
        assert_eq!(bundle.position, Position::WideReceiver);
        assert_eq!(bundle.advanced.unwrap().target_share, Some(0.26));
    }

    #[tokio::test]
    async fn fetches_defense_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams/KC/defense"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "team_id": "KC",
                "rankings": {"pass_defense_rank": 30, "run_defense_rank": 4, "team_count": 32}
            })))
            .mount(&server)
            .await;

        let bundle = client(&server).fetch_defense_stats("KC", 2024, 5).await.unwrap();
        assert_eq!(bundle.rankings.unwrap().pass_defense_rank, Some(30));
    }

    #[tokio::test]
    async fn ids_are_encoded_as_single_path_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players/P1%3Fweek=1/stats"))
            .and(query_param("week", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "player_id": "P1?week=1", "name": "Odd Id", "position": "RB", "team_id": "NYJ"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/K%2FC%23x/defense"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "team_id": "K/C#x"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server);
        let player = c.fetch_player_stats("P1?week=1", 2024, 5).await.unwrap();
        assert_eq!(player.player_id, "P1?week=1");
        let defense = c.fetch_defense_stats("K/C#x", 2024, 5).await.unwrap();
        assert!(defense.is_empty());
    }

    #[tokio::test]
    async fn base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/teams/KC/defense"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "team_id": "KC"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = HttpStatsClient::new(format!("{}/v1/", server.uri()), None, Duration::from_secs(5));
        assert_eq!(c.fetch_defense_stats("KC", 2024, 5).await.unwrap().team_id, "KC");
    }

    #[tokio::test]
    async fn not_found_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).fetch_player_stats("P9", 2024, 5).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_and_rate_limit_are_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players/P1/stats"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/KC/defense"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(c.fetch_player_stats("P1", 2024, 5).await.unwrap_err().is_retryable());
        assert!(c.fetch_defense_stats("KC", 2024, 5).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn garbled_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"player_id\": "))
            .mount(&server)
            .await;

        let err = client(&server).fetch_player_stats("P1", 2024, 5).await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn mismatched_player_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "player_id": "P2", "name": "Someone Else", "position": "QB", "team_id": "NYJ"
            })))
            .mount(&server)
            .await;

        let err = client(&server).fetch_player_stats("P1", 2024, 5).await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let c = HttpStatsClient::new(server.uri(), None, Duration::from_millis(200));
        let err = c.fetch_player_stats("P1", 2024, 5).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { .. }), "got {err:?}");
        assert!(err.is_retryable());
    }
}
