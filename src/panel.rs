// Panel HTTP data source: node list plus latest cumulative network counters per node.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::Deserializer;

use crate::config::PanelConfig;
use crate::error::FetchError;
use crate::models::Node;

/// Cumulative byte counters as read from the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub upload: u64,
    pub download: u64,
}

/// Where counter readings come from. Implemented by the panel client and test fakes.
pub trait CounterSource: Send + Sync {
    fn list_nodes(&self) -> impl Future<Output = anyhow::Result<Vec<Node>>> + Send;

    fn fetch_counters(
        &self,
        node: &Node,
    ) -> impl Future<Output = Result<Counters, FetchError>> + Send;

    /// Reachability check used by the health command.
    fn ping(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiNode {
    uuid: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecentPoint {
    network: Option<NetworkPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkPoint {
    #[serde(default, deserialize_with = "de_counter")]
    total_up: u64,
    #[serde(default, deserialize_with = "de_counter")]
    total_down: u64,
}

/// Counters arrive as integers, occasionally as floats.
fn de_counter<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    match &v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| serde::de::Error::custom(format!("negative counter {}", n))),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("bad counter {}", other))),
    }
}

pub struct PanelClient {
    client: reqwest::Client,
    base_url: String,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = config.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
            let name = HeaderName::from_bytes(config.token_header.as_bytes())
                .with_context(|| format!("panel.token_header {:?}", config.token_header))?;
            let value = format!("{} {}", config.token_prefix.trim(), token.trim());
            let mut value = HeaderValue::from_str(value.trim()).context("panel.api_token")?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("building panel HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl CounterSource for PanelClient {
    async fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let resp = self
            .client
            .get(self.url("/api/nodes"))
            .send()
            .await
            .context("GET /api/nodes")?
            .error_for_status()
            .context("GET /api/nodes")?;
        let body: ApiResponse<Vec<ApiNode>> =
            resp.json().await.context("decoding /api/nodes")?;
        anyhow::ensure!(
            body.status == "success",
            "/api/nodes returned status {:?}",
            body.status
        );

        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|n| {
                let id = n.uuid.filter(|u| !u.is_empty())?;
                let name = n.name.filter(|s| !s.is_empty()).unwrap_or_else(|| id.clone());
                Some(Node { id, name })
            })
            .collect())
    }

    async fn fetch_counters(&self, node: &Node) -> Result<Counters, FetchError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/recent/{}", node.id)))
            .send()
            .await
            .map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body: ApiResponse<Vec<RecentPoint>> = resp
            .json()
            .await
            .map_err(|e| FetchError::BadResponse(e.to_string()))?;
        if body.status != "success" {
            return Err(FetchError::BadResponse(format!("status {:?}", body.status)));
        }
        let points = body.data.unwrap_or_default();
        let Some(last) = points.last() else {
            return Err(FetchError::Empty);
        };
        let net = last.network.as_ref();
        Ok(Counters {
            upload: net.map(|n| n.total_up).unwrap_or(0),
            download: net.map(|n| n.total_down).unwrap_or(0),
        })
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .with_context(|| format!("panel unreachable: {}", self.base_url))?;
        Ok(())
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_points_decode_int_and_float_counters() {
        let json = r#"{"status":"success","data":[
            {"network":{"totalUp":10,"totalDown":20}},
            {"network":{"totalUp":1.5e3,"totalDown":2048}}
        ]}"#;
        let body: ApiResponse<Vec<RecentPoint>> = serde_json::from_str(json).unwrap();
        let last = body.data.unwrap().pop().unwrap().network.unwrap();
        assert_eq!(last.total_up, 1500);
        assert_eq!(last.total_down, 2048);
    }

    #[test]
    fn recent_points_reject_negative_counter() {
        let json = r#"{"status":"success","data":[{"network":{"totalUp":-1,"totalDown":0}}]}"#;
        assert!(serde_json::from_str::<ApiResponse<Vec<RecentPoint>>>(json).is_err());
    }

    #[test]
    fn client_strips_trailing_slash() {
        let cfg = PanelConfig {
            base_url: "https://panel.example/ ".into(),
            api_token: Some("secret".into()),
            token_header: "Authorization".into(),
            token_prefix: "Bearer".into(),
            timeout_secs: 5,
            fetch_workers: 2,
        };
        let client = PanelClient::new(&cfg).unwrap();
        assert_eq!(client.url("/api/nodes"), "https://panel.example/api/nodes");
    }
}
