//! One-shot commit exchange with the head node's HTTP API.
//!
//! The request is independent of the websocket session and never touches the
//! mirror, so it may run concurrently with live event processing.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ClientError, ClientResult};
use crate::types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptType {
    PlutusScriptV2,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlutusScript {
    pub cbor_hex: String,
    pub description: String,
    #[serde(rename = "type")]
    pub script_type: ScriptType,
}

/// Material needed to spend a script-locked output into the head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    pub datum: String,
    pub plutus_v2_script: PlutusScript,
    pub redeemer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witness>,
}

/// Outputs to commit, keyed by output reference.
pub type CommitRequest = BTreeMap<String, UtxoInput>;

/// Draft commit transaction returned by the node, still to be signed and
/// submitted by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCommitTx {
    pub cbor_hex: String,
    pub description: String,
    #[serde(rename = "type")]
    pub tx_type: String,
}

/// HTTP client for `POST /commit`.
#[derive(Clone)]
pub struct CommitClient {
    inner: Client,
    url: Url,
}

impl CommitClient {
    /// Builds a client for the node listening on `host` (`host:port`).
    pub fn new(host: &str, timeout: Duration) -> ClientResult<Self> {
        let url = Url::parse(&format!("http://{host}/commit"))
            .map_err(|err| ClientError::Config(format!("invalid commit endpoint: {err}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { inner: client, url })
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    pub async fn commit(&self, request: &CommitRequest) -> ClientResult<DraftCommitTx> {
        debug!(endpoint = %self.url, outputs = request.len(), "posting commit request");
        let response = self.inner.post(self.url.clone()).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus { status });
        }
        let draft: DraftCommitTx = response.json().await?;
        info!(endpoint = %self.url, tx_type = %draft.tx_type, "received draft commit transaction");
        Ok(draft)
    }
}
