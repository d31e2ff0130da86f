use anyhow::{Context, anyhow};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{Instrument, info_span};

/// HTTP client for the fleet-management API.
#[derive(Clone, Debug)]
pub struct FleetApiClient {
    client: Client,
    base_url: Url,
}

impl FleetApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("Couldn't parse fleet API url")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("fleet API url {base_url} can't be used as a base"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Couldn't build http client")?;

        Ok(Self { client, base_url })
    }

    /// Appends percent-encoded path segments to the base url.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("fleet API url can't be used as a base"))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    pub(crate) async fn get_json<T, Q>(&self, segments: &[&str], query: &Q) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        self.execute(self.client.get(url).query(query)).await
    }

    pub(crate) async fn post_json<T, B>(&self, segments: &[&str], body: &B) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        self.execute(self.client.post(url).json(body)).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request
            .send()
            .instrument(info_span!("Fetching from fleet API"))
            .await
            .context("error sending request")?
            .error_for_status()
            .context("error status from fleet API")?;

        let content = response
            .text()
            .instrument(info_span!("Reading body of response"))
            .await
            .context("Error getting response text")?;

        serde_json::from_str(&content).with_context(|| format!("Error parsing response {content}"))
    }
}
