//! NPS web API broker
//!
//! Every call first asks the server for its clock, then posts a form with
//! `auth_key = md5(api_key + time)` and `timestamp = time`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::broker::{BrokerOperation, TunnelBroker};
use crate::error::{BrokerError, Result};
use crate::types::{ClientStatus, NewClient, NewTunnel, TunnelInfo};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ServerTime {
    time: i64,
}

/// `{status, msg}` with `status == 0` meaning failure
#[derive(Deserialize)]
struct StatusResponse {
    status: i32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    id: Option<i64>,
}

/// `{code, data}` with `code == 0` meaning failure
#[derive(Deserialize)]
struct DataResponse<T> {
    code: i32,
    #[serde(default)]
    data: Option<T>,
}

/// Broker backed by the NPS web API
pub struct NpsBroker {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl NpsBroker {
    /// Create a broker for the API at `base_url`
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .no_proxy()
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        }
    }

    /// Use a preconfigured HTTP client
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Auth key for a server timestamp
    pub fn auth_key(&self, timestamp: i64) -> String {
        format!("{:x}", md5::compute(format!("{}{}", self.api_key, timestamp)))
    }

    async fn server_time(&self) -> Result<i64> {
        let url = format!("{}/auth/gettime", self.base_url);
        let response = self.http_client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(BrokerError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let time: ServerTime = response.json().await?;
        Ok(time.time)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        fields: Vec<(&'static str, String)>,
    ) -> Result<T> {
        let timestamp = self.server_time().await?;

        let mut form = vec![
            ("auth_key", self.auth_key(timestamp)),
            ("timestamp", timestamp.to_string()),
        ];
        form.extend(fields.into_iter().filter(|(_, value)| !value.is_empty()));

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "Calling broker");

        let response = self.http_client.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(BrokerError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| BrokerError::InvalidResponse(format!("{endpoint}: {e}: {body}")))
    }

    async fn client_exists(&self, client_id: i64) -> Result<bool> {
        let response: DataResponse<ClientStatus> = self
            .post_form("/client/getclient/", vec![("id", client_id.to_string())])
            .await?;
        Ok(response.code != 0 && response.data.is_some())
    }

    fn expect_id(operation: BrokerOperation, response: StatusResponse) -> Result<i64> {
        if response.status == 0 {
            return Err(BrokerError::rejected(operation, response.msg));
        }
        response
            .id
            .ok_or_else(|| BrokerError::InvalidResponse(format!("{operation}: response has no id")))
    }
}

#[async_trait]
impl TunnelBroker for NpsBroker {
    async fn create_client(&self, client: &NewClient) -> Result<i64> {
        let response = self.post_form("/client/add/", client.form_fields()).await?;
        let id = Self::expect_id(BrokerOperation::CreateClient, response)?;
        info!(client_id = id, remark = %client.remark, "Created broker client");
        Ok(id)
    }

    async fn create_tunnel(&self, tunnel: &NewTunnel) -> Result<i64> {
        let response = self.post_form("/index/add/", tunnel.form_fields()).await?;
        let id = Self::expect_id(BrokerOperation::CreateTunnel, response)?;
        info!(tunnel_id = id, client_id = tunnel.client_id, "Created broker tunnel");
        Ok(id)
    }

    async fn get_tunnel(&self, tunnel_id: i64) -> Result<TunnelInfo> {
        let response: DataResponse<TunnelInfo> = self
            .post_form("/index/getonetunnel/", vec![("id", tunnel_id.to_string())])
            .await?;

        match response.data {
            Some(tunnel) if response.code != 0 => Ok(tunnel),
            _ => Err(BrokerError::NotFound {
                operation: BrokerOperation::GetTunnel,
                id: tunnel_id,
            }),
        }
    }

    async fn delete_client(&self, client_id: i64) -> Result<()> {
        let response: StatusResponse = self
            .post_form("/client/del/", vec![("id", client_id.to_string())])
            .await?;

        if response.status == 0 {
            // NPS answers a plain "delete error" for unknown ids too
            if let Ok(false) = self.client_exists(client_id).await {
                return Err(BrokerError::NotFound {
                    operation: BrokerOperation::DeleteClient,
                    id: client_id,
                });
            }
            return Err(BrokerError::rejected(BrokerOperation::DeleteClient, response.msg));
        }
        info!(client_id = client_id, "Deleted broker client");
        Ok(())
    }

    fn description(&self) -> &str {
        "NPS web API broker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const SERVER_TIME: i64 = 1_700_000_000;

    type Calls = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

    /// Stand up a fake NPS API and return its base URL plus the recorded calls
    async fn fake_nps(tunnel: Value, delete_status: i32) -> (String, Calls) {
        fake_nps_with_client(tunnel, delete_status, json!({"code": 1, "data": {"Id": 21, "Status": true}})).await
    }

    async fn fake_nps_with_client(tunnel: Value, delete_status: i32, client: Value) -> (String, Calls) {
        let calls: Calls = Arc::default();

        let record = |path: &'static str, calls: Calls, reply: Value| {
            post(move |Form(form): Form<HashMap<String, String>>| {
                let calls = calls.clone();
                let reply = reply.clone();
                async move {
                    calls.lock().unwrap().push((path.to_string(), form));
                    Json(reply)
                }
            })
        };

        let app = Router::new()
            .route("/auth/gettime", post(|| async { Json(json!({ "time": SERVER_TIME })) }))
            .route(
                "/client/add/",
                record("/client/add/", calls.clone(), json!({"status": 1, "msg": "add success", "id": 21})),
            )
            .route(
                "/index/add/",
                record("/index/add/", calls.clone(), json!({"status": 1, "msg": "add success", "id": 34})),
            )
            .route("/index/getonetunnel/", record("/index/getonetunnel/", calls.clone(), tunnel))
            .route(
                "/client/del/",
                record("/client/del/", calls.clone(), json!({"status": delete_status, "msg": "delete error"})),
            )
            .route("/client/getclient/", record("/client/getclient/", calls.clone(), client));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), calls)
    }

    #[test]
    fn test_auth_key_is_salted_md5() {
        let broker = NpsBroker::new("http://nps", "secret");
        assert_eq!(
            broker.auth_key(SERVER_TIME),
            format!("{:x}", md5::compute(format!("secret{SERVER_TIME}")))
        );
        assert_eq!(broker.auth_key(1).len(), 32);
    }

    #[tokio::test]
    async fn test_create_client_posts_signed_form() {
        let (url, calls) = fake_nps(json!({"code": 0}), 1).await;
        let broker = NpsBroker::new(url, "secret");

        let id = broker
            .create_client(&NewClient::new("bench", "m-1700000000"))
            .await
            .unwrap();
        assert_eq!(id, 21);

        let calls = calls.lock().unwrap();
        let (path, form) = &calls[0];
        assert_eq!(path, "/client/add/");
        assert_eq!(form["auth_key"], broker.auth_key(SERVER_TIME));
        assert_eq!(form["timestamp"], SERVER_TIME.to_string());
        assert_eq!(form["vkey"], "m-1700000000");
        assert_eq!(form["config_conn_allow"], "0");
    }

    #[tokio::test]
    async fn test_empty_fields_are_omitted() {
        let (url, calls) = fake_nps(json!({"code": 0}), 1).await;
        let broker = NpsBroker::new(url, "secret");

        broker.create_tunnel(&NewTunnel::tcp("", "32301", 21)).await.unwrap();

        let calls = calls.lock().unwrap();
        let (_, form) = &calls[0];
        assert!(!form.contains_key("remark"));
        assert_eq!(form["type"], "tcp");
        assert_eq!(form["client_id"], "21");
    }

    #[tokio::test]
    async fn test_get_tunnel_decodes_port() {
        let tunnel = json!({
            "code": 1,
            "data": {"Id": 34, "Port": 41034, "Status": true, "Client": {"Id": 21, "Status": true, "IsConnect": true}}
        });
        let (url, _) = fake_nps(tunnel, 1).await;
        let broker = NpsBroker::new(url, "secret");

        let info = broker.get_tunnel(34).await.unwrap();
        assert_eq!(info.port, 41034);
        assert!(info.is_available());
    }

    #[tokio::test]
    async fn test_missing_tunnel_is_rejected() {
        let (url, _) = fake_nps(json!({"code": 0, "data": null}), 1).await;
        let broker = NpsBroker::new(url, "secret");

        let err = broker.get_tunnel(99).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::NotFound {
                operation: BrokerOperation::GetTunnel,
                id: 99
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_failure_is_rejected() {
        let (url, _) = fake_nps(json!({"code": 0}), 0).await;
        let broker = NpsBroker::new(url, "secret");

        let err = broker.delete_client(21).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Rejected {
                operation: BrokerOperation::DeleteClient,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_of_missing_client_is_not_found() {
        let (url, calls) = fake_nps_with_client(json!({"code": 0}), 0, json!({"code": 0})).await;
        let broker = NpsBroker::new(url, "secret");

        let err = broker.delete_client(21).await.unwrap_err();
        assert!(err.is_not_found());

        let calls = calls.lock().unwrap();
        assert_eq!(calls[1].0, "/client/getclient/");
        assert_eq!(calls[1].1["id"], "21");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_transport_error() {
        let broker = NpsBroker::new("http://127.0.0.1:1", "secret");
        let err = broker.delete_client(1).await.unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }
}
