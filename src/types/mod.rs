//! Wire-level domain types shared by the mirror, the event decoder and the
//! commit exchange.

mod utxo;
mod value;

pub use utxo::{Output, Party, Transaction, UtxoSet};
pub use value::{AssetQuantity, Value};
