//! Chain adapters: JSON-over-HTTP clients for the spoke event feeds and the
//! hub's commitment and execution endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use courier_base::settings::{ChainConf, ChainSetup};
use courier_core::{
    ChainCommunicationError, ChainId, ChainResult, HubChain, MessageEvent, MessageId, SpokeChain,
    TxOutcome,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build http client")
}

/// Map an HTTP-level failure to a chain error. Client errors are the chain
/// refusing the call; everything else is transient.
async fn check(response: reqwest::Response) -> ChainResult<reqwest::Response> {
    let status = response.status();
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChainCommunicationError::Rejected(format!(
            "{status}: {body}"
        )));
    }
    if !status.is_success() {
        return Err(ChainCommunicationError::Rpc(format!("http {status}")));
    }
    Ok(response)
}

fn rpc_err(e: reqwest::Error) -> ChainCommunicationError {
    if e.is_timeout() {
        ChainCommunicationError::TransactionTimeout
    } else {
        ChainCommunicationError::Rpc(e.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBundleRequest {
    bundle_id: H256,
    commitment: H256,
    message_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    origin: ChainId,
    sequence: u64,
    receiver: H256,
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    txid: H256,
    executed: bool,
}

impl From<TxResponse> for TxOutcome {
    fn from(r: TxResponse) -> Self {
        TxOutcome {
            txid: r.txid,
            executed: r.executed,
        }
    }
}

/// A spoke chain reached through its HTTP adapter service.
#[derive(Debug, new)]
pub(crate) struct HttpSpoke {
    chain: ChainId,
    name: String,
    url: String,
    #[new(value = "client()")]
    client: reqwest::Client,
}

#[async_trait]
impl SpokeChain for HttpSpoke {
    fn chain(&self) -> ChainId {
        self.chain
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_events(
        &self,
        from_sequence: u64,
        limit: usize,
    ) -> ChainResult<Vec<MessageEvent>> {
        let response = self
            .client
            .get(format!("{}/events", self.url))
            .query(&[("from", from_sequence.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(rpc_err)?;
        check(response).await?.json().await.map_err(rpc_err)
    }

    async fn latest_sequence(&self) -> ChainResult<Option<u64>> {
        let response = self
            .client
            .get(format!("{}/latest-sequence", self.url))
            .send()
            .await
            .map_err(rpc_err)?;
        check(response).await?.json().await.map_err(rpc_err)
    }
}

/// The hub chain reached through its HTTP adapter service.
#[derive(Debug, new)]
pub(crate) struct HttpHub {
    chain: ChainId,
    name: String,
    url: String,
    #[new(value = "client()")]
    client: reqwest::Client,
}

#[async_trait]
impl HubChain for HttpHub {
    fn chain(&self) -> ChainId {
        self.chain
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_bundle(
        &self,
        bundle_id: H256,
        commitment: H256,
        message_count: u32,
    ) -> ChainResult<TxOutcome> {
        let response = self
            .client
            .post(format!("{}/bundles", self.url))
            .json(&SubmitBundleRequest {
                bundle_id,
                commitment,
                message_count,
            })
            .send()
            .await
            .map_err(rpc_err)?;
        let tx: TxResponse = check(response).await?.json().await.map_err(rpc_err)?;
        Ok(tx.into())
    }

    async fn confirmations(&self, txid: H256) -> ChainResult<u64> {
        let response = self
            .client
            .get(format!("{}/confirmations/{txid:?}", self.url))
            .send()
            .await
            .map_err(rpc_err)?;
        check(response).await?.json().await.map_err(rpc_err)
    }

    async fn revert_signal(&self, bundle_id: H256) -> ChainResult<bool> {
        let response = self
            .client
            .get(format!("{}/revert/{bundle_id:?}", self.url))
            .send()
            .await
            .map_err(rpc_err)?;
        check(response).await?.json().await.map_err(rpc_err)
    }

    async fn execute_message(
        &self,
        message_id: MessageId,
        receiver: H256,
        payload: &[u8],
    ) -> ChainResult<TxOutcome> {
        let response = self
            .client
            .post(format!("{}/execute", self.url))
            .json(&ExecuteRequest {
                origin: message_id.origin,
                sequence: message_id.sequence,
                receiver,
                payload: hex::encode(payload),
            })
            .send()
            .await
            .map_err(rpc_err)?;
        let tx: TxResponse = check(response).await?.json().await.map_err(rpc_err)?;
        Ok(tx.into())
    }

    async fn execution_result(&self, message_id: MessageId) -> ChainResult<Option<H256>> {
        let response = self
            .client
            .get(format!(
                "{}/result/{}/{}",
                self.url, message_id.origin, message_id.sequence
            ))
            .send()
            .await
            .map_err(rpc_err)?;
        check(response).await?.json().await.map_err(rpc_err)
    }
}

/// Build a spoke client from its configured connection.
pub(crate) fn build_spoke(setup: &ChainSetup) -> Arc<dyn SpokeChain> {
    match &setup.connection {
        ChainConf::Http { url } => Arc::new(HttpSpoke::new(
            setup.chain_id,
            setup.name.clone(),
            url.trim_end_matches('/').to_string(),
        )),
    }
}

/// Build the hub client from its configured connection.
pub(crate) fn build_hub(setup: &ChainSetup) -> Arc<dyn HubChain> {
    match &setup.connection {
        ChainConf::Http { url } => Arc::new(HttpHub::new(
            setup.chain_id,
            setup.name.clone(),
            url.trim_end_matches('/').to_string(),
        )),
    }
}
