//! HTTP answer producer.

use std::time::Duration;

use futures::StreamExt;
use url::Url;

use crate::error::{Error, Result};

use super::{ByteStream, Upstream};

/// Producer reached over HTTP.
///
/// Sends `POST <endpoint>` with `{ "question": ... }` and streams the body.
#[derive(Clone)]
pub struct HttpUpstream {
    http: reqwest::Client,
    endpoint: Url,
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl HttpUpstream {
    /// Create a producer for `endpoint`.
    ///
    /// `connect_timeout` bounds connection setup only; the body may stream
    /// for as long as the producer keeps it open.
    pub fn new(endpoint: impl AsRef<str>, connect_timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http, endpoint })
    }

    /// Create a producer with a custom reqwest client.
    pub fn with_client(endpoint: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        Ok(Self { http, endpoint })
    }

    /// The endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Upstream for HttpUpstream {
    async fn open(&self, question: &str) -> Result<ByteStream> {
        let body = serde_json::json!({ "question": question });

        let resp = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(
            name: "upstream.http.opened",
            endpoint = %self.endpoint,
            status = status.as_u16(),
            "Upstream stream opened"
        );

        let bytes = resp.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| Error::Transport(e.to_string()))
        });
        Ok(Box::pin(bytes))
    }
}
