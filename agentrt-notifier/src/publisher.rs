//! `Publisher`: delivers one message to one external chat target. Concrete
//! connectors (Telegram, Slack, a generic webhook) implement this; the
//! notifier only ever sees the trait object.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, external_id: &str, message: &str) -> Result<(), String>;
}

#[cfg(test)]
fn _assert_object_safe(_p: &dyn Publisher) {}

/// Registry of publishers keyed by lowercased connector name.
#[derive(Default, Clone)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: impl Into<String>, publisher: Arc<dyn Publisher>) {
        self.publishers
            .insert(connector.into().to_lowercase(), publisher);
    }

    pub fn get(&self, connector: &str) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&connector.to_lowercase()).cloned()
    }
}

/// Posts `{"external_id": ..., "message": ...}` to a fixed webhook URL. One
/// instance per connector, registered under that connector's name.
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, external_id: &str, message: &str) -> Result<(), String> {
        let body = serde_json::json!({
            "external_id": external_id,
            "message": message,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn webhook_publisher_posts_body_and_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let publisher = WebhookPublisher::new(format!("{}/notify", server.uri()));
        publisher.publish("120", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn webhook_publisher_surfaces_non_2xx_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let publisher = WebhookPublisher::new(format!("{}/notify", server.uri()));
        let err = publisher.publish("120", "hello").await.unwrap_err();
        assert!(err.contains("500"));
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let mut registry = PublisherRegistry::new();
        registry.register("Telegram", Arc::new(WebhookPublisher::new("http://example.invalid")));
        assert!(registry.get("telegram").is_some());
        assert!(registry.get("TELEGRAM").is_some());
        assert!(registry.get("slack").is_none());
    }
}
