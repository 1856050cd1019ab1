use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Chunked byte stream returned by a transport.
pub type ByteStream = BoxStream<'static, anyhow::Result<Vec<u8>>>;

/// What a transport knows about a model's bytes before streaming them.
pub struct FetchResponse {
    pub stream: ByteStream,
    /// Declared total size in bytes; 0 when the transport does not know.
    pub total_size: u64,
    /// Lowercase hex SHA-256 of the full artifact; empty when the transport
    /// does not provide one.
    pub checksum: String,
}

/// The single abstract capability this subsystem needs from the network:
/// given a model id, return a byte stream, declared total size, and a
/// checksum. Retries, TLS, and auth are the transport's concern.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn fetch(&self, model_id: &str) -> anyhow::Result<FetchResponse>;
}

/// HTTP transport over a model artifact endpoint.
///
/// Expects `GET {base_url}/models/{id}` to stream the artifact with a
/// `Content-Length` header and the digest in `x-checksum-sha256`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BlobTransport for HttpTransport {
    async fn fetch(&self, model_id: &str) -> anyhow::Result<FetchResponse> {
        let url = format!("{}/models/{}", self.base_url.trim_end_matches('/'), model_id);
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let total_size = response.content_length().unwrap_or(0);
        let checksum = response
            .headers()
            .get("x-checksum-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(anyhow::Error::from)
            })
            .boxed();

        Ok(FetchResponse {
            stream,
            total_size,
            checksum,
        })
    }
}
