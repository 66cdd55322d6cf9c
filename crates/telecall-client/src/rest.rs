//! Room history over REST.
//!
//! History predates the live socket session, so it comes from the backend
//! rather than the signaling channel.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use telecall_common::models::RoomMessage;
use url::Url;

use crate::error::{ClientError, Result};

/// Where room history comes from.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Full history of `room_id`, oldest first.
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<RoomMessage>>;
}

/// `GET {base}/appointments/{room_id}/messages` against the backend.
#[derive(Clone)]
pub struct HistoryClient {
    client: Client,
    base_url: Url,
}

impl HistoryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::build(base_url, None)
    }

    /// Client that sends `Authorization: Bearer <token>` on every request.
    pub fn with_token(base_url: &str, token: &str) -> Result<Self> {
        Self::build(base_url, Some(token))
    }

    fn build(base_url: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ClientError::Api {
                    status: 0,
                    message: format!("Invalid token: {e}"),
                }
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url.trim_end_matches('/'))?,
        })
    }

    /// URL for one room's history; segments are percent-encoded.
    pub fn history_url(&self, room_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["appointments", room_id, "messages"]);
        Ok(url)
    }

    // ── Internal ──

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl HistorySource for HistoryClient {
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<RoomMessage>> {
        let url = self.history_url(room_id)?;
        tracing::debug!(%url, "Fetching room history");
        self.get(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_url_appends_segments() {
        let client = HistoryClient::new("http://localhost:3000/api/").unwrap();
        assert_eq!(
            client.history_url("appt-7").unwrap().as_str(),
            "http://localhost:3000/api/appointments/appt-7/messages"
        );
    }

    #[test]
    fn room_ids_are_escaped() {
        let client = HistoryClient::new("http://localhost:3000/api").unwrap();
        assert_eq!(
            client.history_url("a/b c").unwrap().path(),
            "/api/appointments/a%2Fb%20c/messages"
        );
    }

    #[test]
    fn bad_base_url_is_rejected() {
        assert!(matches!(HistoryClient::new("not a url"), Err(ClientError::Url(_))));
    }
}
