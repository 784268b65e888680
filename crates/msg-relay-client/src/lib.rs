//! Message Relay Client
//!
//! HTTP implementation of [`MessageTransport`] against the relay service.
//! Signing-round scope travels in the `message_id` header, the setup-message
//! namespace in the `message-id` header.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};
use tss_core::transport::{async_trait, MessageTransport};
use tss_core::{Envelope, Error, PartyId, Result, SetupKey};

const MESSAGE_ID_HEADER: &str = "message_id";
const NAMESPACE_HEADER: &str = "message-id";

/// HTTP-based relay client
#[derive(Clone)]
pub struct RelayClient {
    /// HTTP client
    client: Client,
    /// Relay service URL
    url: String,
    /// Request timeout
    timeout: Duration,
}

impl RelayClient {
    /// Create a new relay client
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str, message_id: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.endpoint(path))
            .timeout(self.timeout);
        match message_id {
            Some(id) => builder.header(MESSAGE_ID_HEADER, id),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{} failed with status: {}",
                response.url().path(),
                response.status()
            )));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Body of a GET, `None` on 404
    async fn get_optional_text(&self, builder: RequestBuilder) -> Result<Option<String>> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                Ok((!body.is_empty()).then_some(body))
            }
            status => Err(Error::Transport(format!(
                "{} failed with status: {status}",
                response.url().path()
            ))),
        }
    }
}

fn with_setup_key(builder: RequestBuilder, key: &SetupKey) -> RequestBuilder {
    let builder = match &key.message_id {
        Some(id) => builder.header(MESSAGE_ID_HEADER, id),
        None => builder,
    };
    match &key.namespace {
        Some(namespace) => builder.header(NAMESPACE_HEADER, namespace),
        None => builder,
    }
}

#[async_trait]
impl MessageTransport for RelayClient {
    #[instrument(skip(self))]
    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        self.send(self.request(Method::POST, session_id, None).json(parties))
            .await?;
        Ok(())
    }

    async fn participants(&self, session_id: &str) -> Result<Vec<PartyId>> {
        self.get_json(self.request(Method::GET, session_id, None))
            .await
    }

    #[instrument(skip(self))]
    async fn start_with_committee(&self, session_id: &str, committee: &[PartyId]) -> Result<()> {
        self.send(
            self.request(Method::POST, &format!("start/{session_id}"), None)
                .json(committee),
        )
        .await?;
        Ok(())
    }

    async fn committee(&self, session_id: &str) -> Result<Vec<PartyId>> {
        self.get_json(self.request(Method::GET, &format!("start/{session_id}"), None))
            .await
    }

    #[instrument(skip(self))]
    async fn mark_complete(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        self.send(
            self.request(Method::POST, &format!("complete/{session_id}"), None)
                .json(parties),
        )
        .await?;
        Ok(())
    }

    async fn completed_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        self.get_json(self.request(Method::GET, &format!("complete/{session_id}"), None))
            .await
    }

    async fn send_message(&self, message_id: Option<&str>, envelope: &Envelope) -> Result<()> {
        self.send(
            self.request(
                Method::POST,
                &format!("message/{}", envelope.session_id),
                message_id,
            )
            .json(envelope),
        )
        .await?;
        debug!(to = ?envelope.to, seq = envelope.sequence_no, "Message posted");
        Ok(())
    }

    async fn messages(
        &self,
        session_id: &str,
        party: &str,
        message_id: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.get_json(self.request(
            Method::GET,
            &format!("message/{session_id}/{party}"),
            message_id,
        ))
        .await
    }

    async fn delete_message(
        &self,
        session_id: &str,
        party: &str,
        hash: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("message/{session_id}/{party}/{hash}"),
            message_id,
        ))
        .await?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn upload_setup(&self, session_id: &str, key: &SetupKey, body: &str) -> Result<()> {
        let builder = self
            .request(Method::POST, &format!("setup-message/{session_id}"), None)
            .body(body.to_string());
        self.send(with_setup_key(builder, key)).await?;
        Ok(())
    }

    async fn setup_message(&self, session_id: &str, key: &SetupKey) -> Result<Option<String>> {
        let builder = self.request(Method::GET, &format!("setup-message/{session_id}"), None);
        self.get_optional_text(with_setup_key(builder, key)).await
    }

    #[instrument(skip(self, signature))]
    async fn mark_keysign_complete(
        &self,
        session_id: &str,
        message_id: &str,
        signature: &str,
    ) -> Result<()> {
        self.send(
            self.request(
                Method::POST,
                &format!("complete/{session_id}/keysign"),
                Some(message_id),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(signature.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn keysign_result(&self, session_id: &str, message_id: &str) -> Result<Option<String>> {
        self.get_optional_text(self.request(
            Method::GET,
            &format!("complete/{session_id}/keysign"),
            Some(message_id),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = RelayClient::new("http://relay.local:8080/");
        assert_eq!(client.endpoint("message/s1"), "http://relay.local:8080/message/s1");
        assert_eq!(client.endpoint("/start/s1"), "http://relay.local:8080/start/s1");
    }

    #[test]
    fn test_scoping_headers() {
        let client = RelayClient::new("http://relay.local");
        let request = client
            .request(Method::GET, "message/s1/a", Some("abc"))
            .build()
            .unwrap();
        assert_eq!(request.headers()[MESSAGE_ID_HEADER], "abc");

        let key = SetupKey::new(Some("m1"), Some("eddsa"));
        let request = with_setup_key(client.request(Method::GET, "setup-message/s1", None), &key)
            .build()
            .unwrap();
        assert_eq!(request.headers()[MESSAGE_ID_HEADER], "m1");
        assert_eq!(request.headers()[NAMESPACE_HEADER], "eddsa");
        assert_eq!(request.url().path(), "/setup-message/s1");
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let client = RelayClient::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(200));
        let result = client.participants("s1").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
