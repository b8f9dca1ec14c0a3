use serde::{Deserialize, Serialize};

/// Inputs the client may send to the head node over the websocket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ClientCommand {
    Init,
    Abort,
    #[serde(rename = "GetUTxO")]
    GetUtxo,
    Close,
    Fanout,
    Contest,
    NewTx { transaction: String },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Init => "Init",
            ClientCommand::Abort => "Abort",
            ClientCommand::GetUtxo => "GetUTxO",
            ClientCommand::Close => "Close",
            ClientCommand::Fanout => "Fanout",
            ClientCommand::Contest => "Contest",
            ClientCommand::NewTx { .. } => "NewTx",
        }
    }

    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
