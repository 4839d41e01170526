use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use shared::protocol::{
    AssistantFile, BootstrapResponse, ChatRequest, CheckAssistantResponse,
    ListAssistantFilesResponse, BOOTSTRAP_PATH, CHAT_PATH, CHECK_ASSISTANT_PATH,
    LIST_ASSISTANT_FILES_PATH,
};
use tracing::info;
use url::Url;

use crate::{config::ClientSettings, error::ChatError};

/// Raw response body of the chat endpoint. Dropping it releases the connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn check_assistant(&self) -> Result<CheckAssistantResponse, ChatError>;
    async fn list_assistant_files(&self) -> Result<Vec<AssistantFile>, ChatError>;
    async fn trigger_bootstrap(&self) -> Result<BootstrapResponse, ChatError>;
    /// Resolves once response headers arrived with a success status.
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError>;
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(http: Client, base_url: Url, request_timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            request_timeout,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let base_url = settings.backend_url()?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
            .build()?;
        Ok(Self::new(
            http,
            base_url,
            Duration::from_secs(settings.request_timeout_seconds),
        ))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base_url.join(path).map_err(ChatError::transport)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let res = self
            .http
            .get(self.endpoint(path)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(ChatError::transport)?;
        ensure_success(res)?
            .json()
            .await
            .map_err(ChatError::transport)
    }
}

fn ensure_success(res: Response) -> Result<Response, ChatError> {
    let status = res.status();
    if status.is_success() {
        Ok(res)
    } else {
        Err(ChatError::Transport(format!(
            "{} responded with status {status}",
            res.url().path()
        )))
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn check_assistant(&self) -> Result<CheckAssistantResponse, ChatError> {
        self.get_json(CHECK_ASSISTANT_PATH).await
    }

    async fn list_assistant_files(&self) -> Result<Vec<AssistantFile>, ChatError> {
        let response: ListAssistantFilesResponse =
            self.get_json(LIST_ASSISTANT_FILES_PATH).await?;
        match response {
            ListAssistantFilesResponse::Success { files } => Ok(files),
            ListAssistantFilesResponse::Error { message } => Err(ChatError::Assistant(message)),
        }
    }

    async fn trigger_bootstrap(&self) -> Result<BootstrapResponse, ChatError> {
        let res = self
            .http
            .post(self.endpoint(BOOTSTRAP_PATH)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(ChatError::transport)?;
        ensure_success(res)?
            .json()
            .await
            .map_err(ChatError::transport)
    }

    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        let url = self.endpoint(CHAT_PATH)?;
        info!(%url, history = request.history.len(), "opening chat stream");
        let res = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(ChatError::transport)?;
        let body = ensure_success(res)?
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::transport));
        Ok(Box::pin(body))
    }
}
