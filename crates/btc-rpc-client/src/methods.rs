//! Typed descriptors for common node RPC methods.
//!
//! A descriptor carries the method name, its positional params and the
//! shape of its result. [`RpcClient::invoke`](crate::RpcClient::invoke)
//! sends one and decodes the reply into [`RpcMethod::Output`].

use crate::domain::network::Network;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One node RPC method.
pub trait RpcMethod {
    /// Wire method name
    const NAME: &'static str;

    /// Decoded result
    type Output: DeserializeOwned;

    /// Positional params
    fn params(&self) -> Vec<Value> {
        Vec::new()
    }
}

/// `getblockcount` - height of the most-work chain
#[derive(Debug, Clone, Copy, Default)]
pub struct GetBlockCount;

impl RpcMethod for GetBlockCount {
    const NAME: &'static str = "getblockcount";
    type Output = u64;
}

/// `getbestblockhash` - tip hash, hex
#[derive(Debug, Clone, Copy, Default)]
pub struct GetBestBlockHash;

impl RpcMethod for GetBestBlockHash {
    const NAME: &'static str = "getbestblockhash";
    type Output = String;
}

/// `getblockhash <height>`
#[derive(Debug, Clone, Copy)]
pub struct GetBlockHash {
    pub height: u64,
}

impl RpcMethod for GetBlockHash {
    const NAME: &'static str = "getblockhash";
    type Output = String;

    fn params(&self) -> Vec<Value> {
        vec![json!(self.height)]
    }
}

/// `getblockchaininfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct GetBlockchainInfo;

impl RpcMethod for GetBlockchainInfo {
    const NAME: &'static str = "getblockchaininfo";
    type Output = BlockchainInfo;
}

/// Subset of `getblockchaininfo` shared by bitcoind and btcd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// `main`/`mainnet`, `test`/`testnet3`, `regtest`, `signet` or `simnet`
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    pub bestblockhash: String,
    pub difficulty: f64,
    #[serde(default)]
    pub mediantime: u64,
    #[serde(default)]
    pub verificationprogress: f64,
    #[serde(default)]
    pub initialblockdownload: bool,
    #[serde(default)]
    pub pruned: bool,
}

impl BlockchainInfo {
    /// Catalogued network whose chain name the node reported
    pub fn network(&self) -> Option<Network> {
        Network::from_chain_name(&self.chain)
    }
}

/// `getnetworkinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct GetNetworkInfo;

impl RpcMethod for GetNetworkInfo {
    const NAME: &'static str = "getnetworkinfo";
    type Output = NetworkInfo;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
    pub protocolversion: u64,
    pub connections: u64,
    #[serde(default)]
    pub relayfee: f64,
}

/// `getrawtransaction <txid> <verbose>`.
///
/// The result is hex when `verbose` is false and a decoded object
/// otherwise, so it is left as raw JSON.
#[derive(Debug, Clone)]
pub struct GetRawTransaction {
    pub txid: String,
    pub verbose: bool,
}

impl RpcMethod for GetRawTransaction {
    const NAME: &'static str = "getrawtransaction";
    type Output = Value;

    fn params(&self) -> Vec<Value> {
        // btcd wants 0/1, bitcoind accepts both
        vec![json!(self.txid), json!(u8::from(self.verbose))]
    }
}

/// `sendrawtransaction <hex>` - returns the txid
#[derive(Debug, Clone)]
pub struct SendRawTransaction {
    pub hex: String,
}

impl RpcMethod for SendRawTransaction {
    const NAME: &'static str = "sendrawtransaction";
    type Output = String;

    fn params(&self) -> Vec<Value> {
        vec![json!(self.hex)]
    }
}

/// `estimatesmartfee <conf_target>`
#[derive(Debug, Clone, Copy)]
pub struct EstimateSmartFee {
    pub conf_target: u16,
}

impl RpcMethod for EstimateSmartFee {
    const NAME: &'static str = "estimatesmartfee";
    type Output = FeeEstimate;

    fn params(&self) -> Vec<Value> {
        vec![json!(self.conf_target)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// BTC/kvB; absent when the node has too little data
    #[serde(default)]
    pub feerate: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub blocks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_encoding() {
        assert!(GetBlockCount.params().is_empty());
        assert_eq!(GetBlockHash { height: 170 }.params(), vec![json!(170)]);
        assert_eq!(
            GetRawTransaction {
                txid: "ab".into(),
                verbose: true
            }
            .params(),
            vec![json!("ab"), json!(1)]
        );
        assert_eq!(EstimateSmartFee { conf_target: 6 }.params(), vec![json!(6)]);
    }

    #[test]
    fn test_blockchain_info_decoding() {
        let info: BlockchainInfo = serde_json::from_value(json!({
            "chain": "regtest",
            "blocks": 101,
            "headers": 101,
            "bestblockhash": "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            "difficulty": 4.656542373906925e-10,
            "mediantime": 1296688602,
            "verificationprogress": 1,
            "initialblockdownload": true,
            "chainwork": "00000000000000000000000000000000000000000000000000000000000000ca",
            "size_on_disk": 30487,
            "pruned": false,
            "warnings": ""
        }))
        .unwrap();
        assert_eq!(info.blocks, 101);
        assert_eq!(info.network(), Some(Network::Regtest));
    }

    #[test]
    fn test_chain_names_map_to_networks() {
        let spellings = Network::ALL
            .into_iter()
            .flat_map(|n| n.chain_names().iter().map(move |chain| (n, *chain)));
        for (network, chain) in spellings {
            let info = BlockchainInfo {
                chain: chain.to_string(),
                blocks: 0,
                headers: 0,
                bestblockhash: String::new(),
                difficulty: 1.0,
                mediantime: 0,
                verificationprogress: 0.0,
                initialblockdownload: false,
                pruned: false,
            };
            assert_eq!(info.network(), Some(network));
        }
    }

    #[test]
    fn test_fee_estimate_without_data() {
        let fee: FeeEstimate = serde_json::from_value(json!({
            "errors": ["Insufficient data or no feerate found"],
            "blocks": 2
        }))
        .unwrap();
        assert_eq!(fee.feerate, None);
        assert_eq!(fee.errors.len(), 1);
    }
}
