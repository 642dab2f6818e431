//! Plugin download transport.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::Result;

/// Buffered transfer events per download.
const TRANSFER_CHANNEL_CAPACITY: usize = 32;

/// Upper bound on the body buffer reserved from `Content-Length`.
const INITIAL_BUFFER_LIMIT: u64 = 1 << 20;

/// Why a transfer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("transfer ended before the body was complete")]
    Incomplete,
}

/// Observable events of one transfer.
///
/// A well-behaved transfer emits any number of `Progress` events followed by
/// exactly one `Loaded` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress { loaded: u64, total: Option<u64> },
    Loaded(Vec<u8>),
    Failed(TransferError),
}

/// Starts plugin downloads.
pub trait PluginTransport: Send + Sync {
    /// Begin fetching `url`. The returned channel closes after the terminal
    /// event; closing without one counts as [`TransferError::Incomplete`].
    fn fetch(&self, url: &str) -> mpsc::Receiver<TransferEvent>;
}

/// HTTP GET transport reporting progress per received chunk.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl PluginTransport for HttpTransport {
    fn fetch(&self, url: &str) -> mpsc::Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel(TRANSFER_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            let event = match download(&client, &url, &tx).await {
                Ok(body) => TransferEvent::Loaded(body),
                Err(err) => {
                    tracing::warn!(%url, error = %err, "plugin download failed");
                    TransferEvent::Failed(err)
                }
            };
            // Receiver gone means nobody is waiting for the result.
            let _ = tx.send(event).await;
        });

        rx
    }
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::Sender<TransferEvent>,
) -> std::result::Result<Vec<u8>, TransferError> {
    tracing::debug!(url, "starting plugin download");
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransferError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }

    // Untrusted: reported in progress events, never trusted for allocation.
    let total = response.content_length();
    let reserve = total.map_or(0, |total| total.min(INITIAL_BUFFER_LIMIT));
    let mut body = Vec::with_capacity(reserve as usize);
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransferError::Request(e.to_string()))?
    {
        body.extend_from_slice(&chunk);
        let _ = tx
            .send(TransferEvent::Progress {
                loaded: body.len() as u64,
                total,
            })
            .await;
    }

    if let Some(total) = total {
        if (body.len() as u64) < total {
            return Err(TransferError::Incomplete);
        }
    }

    Ok(body)
}
