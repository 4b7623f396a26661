use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::protocol::truncate;
use super::{FilePart, FormFields, RemoteTransport};
use crate::domain::error::RemoteError;
use crate::domain::job::RemoteAction;

/// reqwest による HTTP 送信路
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `timeout` は 1 リクエストごとの上限。ハングした呼び出しでポーリングが止まらないようにする。
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn url_for(&self, action: RemoteAction) -> String {
        format!("{}/{}", self.base_url, action.as_str())
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn post(
        &self,
        action: RemoteAction,
        form: FormFields,
        file: Option<FilePart>,
    ) -> Result<String, RemoteError> {
        let url = self.url_for(action);
        let request = self.client.post(&url);

        let request = match file {
            None => request.form(&form),
            Some(part) => {
                let mut body = multipart::Form::new();
                for (key, value) in form {
                    body = body.text(key, value);
                }
                let file_part = multipart::Part::bytes(part.content).file_name(part.file_name);
                request.multipart(body.part("content", file_part))
            }
        };

        log::debug!("POST {}", url);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::transport(action, format!("request timed out: {e}"))
            } else {
                RemoteError::transport(action, format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(action, format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(RemoteError::transport(
                action,
                format!("HTTP {status}: {}", truncate(&body, 200)),
            ));
        }

        Ok(body)
    }
}
