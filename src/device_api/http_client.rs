use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{ApiError, DeviceApi, Health, OperateAction};

/// reqwest client for the logger service at `http://<endpoint>/api`
#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    client: Client,
    base_url: String,
}

impl HttpDeviceApi {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}/api", endpoint.trim_end_matches('/'))
        } else {
            format!("http://{}/api", endpoint.trim_end_matches('/'))
        };
        info!("Device API at {}", base_url);
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn request_error(url: &str) -> impl FnOnce(reqwest::Error) -> ApiError + '_ {
    move |source| ApiError::Request {
        url: url.to_string(),
        source,
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, ApiError> {
    let body = response.bytes().await.map_err(request_error(url))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn health(&self) -> Result<Health, ApiError> {
        let url = self.url("health");
        debug!("Getting heartbeat from {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(request_error(&url))?;
        decode(&url, response).await
    }

    async fn get_settings(&self, sensor_id: &str) -> Result<Value, ApiError> {
        let url = self.url(&format!("settings/{}", sensor_id));
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(request_error(&url))?;
        decode(&url, response).await
    }

    async fn put_settings(&self, sensor_id: &str, settings: &Value) -> Result<Value, ApiError> {
        let url = self.url(&format!("settings/{}", sensor_id));
        debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .json(settings)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(request_error(&url))?;

        // 204 means the service took the body as-is
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(settings.clone());
        }
        decode(&url, response).await
    }

    async fn operate(&self, sensor_id: &str, action: OperateAction) -> Result<(), ApiError> {
        let url = self.url(&format!("devices/{}", sensor_id));
        debug!("POST {}?action={}", url, action);
        self.client
            .post(&url)
            .query(&[("action", action.as_str())])
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(request_error(&url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpDeviceApi {
        HttpDeviceApi::new(&server.uri(), Duration::from_secs(2)).expect("client")
    }

    #[test]
    fn base_url_accepts_bare_host_or_scheme() {
        let bare = HttpDeviceApi::new("localhost:5000", Duration::from_secs(1)).expect("client");
        assert_eq!(bare.base_url(), "http://localhost:5000/api");

        let with_scheme =
            HttpDeviceApi::new("http://10.0.0.2:5000/", Duration::from_secs(1)).expect("client");
        assert_eq!(with_scheme.url("health"), "http://10.0.0.2:5000/api/health");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_request_error() {
        let api = HttpDeviceApi::new("127.0.0.1:9", Duration::from_millis(200)).expect("client");
        assert!(matches!(api.health().await, Err(ApiError::Request { .. })));
    }

    #[tokio::test]
    async fn operate_posts_action_as_query() {
        let server = MockServer::start().await;
        for action in ["start", "stop"] {
            Mock::given(method("POST"))
                .and(path("/api/devices/cx1"))
                .and(query_param("action", action))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }
        let api = api_for(&server);

        api.operate("cx1", OperateAction::Start).await.expect("start");
        api.operate("cx1", OperateAction::Stop).await.expect("stop");
    }

    #[tokio::test]
    async fn non_success_status_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/devices/cx1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let api = api_for(&server);

        assert!(matches!(api.health().await, Err(ApiError::Request { .. })));
        assert!(matches!(
            api.operate("cx1", OperateAction::Start).await,
            Err(ApiError::Request { .. })
        ));
    }

    #[tokio::test]
    async fn put_without_content_echoes_sent_settings() {
        let server = MockServer::start().await;
        let settings = json!({"sample_rate": 500, "channels": [1, 2]});
        Mock::given(method("PUT"))
            .and(path("/api/settings/cx1"))
            .and(body_json(&settings))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let applied = api_for(&server)
            .put_settings("cx1", &settings)
            .await
            .expect("put");
        assert_eq!(applied, settings);
    }

    #[tokio::test]
    async fn put_with_body_returns_service_settings() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/settings/cx1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sample_rate": 400})))
            .mount(&server)
            .await;

        let applied = api_for(&server)
            .put_settings("cx1", &json!({"sample_rate": 500}))
            .await
            .expect("put");
        assert_eq!(applied, json!({"sample_rate": 400}));
    }

    #[tokio::test]
    async fn health_body_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_id": "pi-01",
                "sensors": [{"sensor_id": "cx1", "active": true}]
            })))
            .mount(&server)
            .await;

        let health = api_for(&server).health().await.expect("health");
        assert_eq!(health.device_id.as_deref(), Some("pi-01"));
        assert_eq!(health.sensors, vec![crate::sensors::SensorRecord::new("cx1", true)]);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/settings/cx1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            api_for(&server).get_settings("cx1").await,
            Err(ApiError::Decode { .. })
        ));
    }
}
