#[derive(thiserror::Error, Debug)]
pub enum EtaError {
    #[error("ETA service not initialized")]
    NotInitialized,

    #[error("error fetching {endpoint}")]
    RemoteFetch {
        endpoint: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("no ETA data for {0}")]
    NoData(String),
}

impl EtaError {
    pub(crate) fn remote(endpoint: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| EtaError::RemoteFetch { endpoint, source }
    }
}
