//! Remote store wiring for commands that need the network.

use std::path::Path;
use std::time::Duration;

use tillsync_engine::{EngineConfig, HttpClient, HttpRemote, HttpResponse, SyncEngine};
use tillsync_local::LocalStore;

/// A blocking `reqwest` client behind the engine's HTTP abstraction.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with timeouts suited to till hardware on flaky links.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, token: Option<&str>, body: &[u8]) -> Result<HttpResponse, String> {
        let mut request = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_vec());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(|err| err.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|err| err.to_string())?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Opens the local store and builds an engine over the HTTP remote.
///
/// The store id comes from the flag when given, otherwise from the node
/// record a previous engine start persisted.
pub fn open_engine(
    db: &Path,
    remote_url: &str,
    token: Option<&str>,
    store_id: Option<&str>,
    configure: impl FnOnce(EngineConfig) -> EngineConfig,
) -> Result<SyncEngine<HttpRemote<ReqwestClient>>, Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    let store_id = match store_id {
        Some(id) => id.to_string(),
        None => local
            .load_node()?
            .map(|node| node.store_id)
            .ok_or("no node record yet; pass --store-id for the first sync")?,
    };

    let mut remote = HttpRemote::new(remote_url, &store_id, ReqwestClient::new()?);
    if let Some(token) = token {
        remote = remote.with_bearer_token(token);
    }
    let engine = SyncEngine::new(configure(EngineConfig::new(&store_id)), remote, local)?;
    Ok(engine)
}
