//! Network parameters and the identity guard.
//!
//! A client is bound to exactly one Bitcoin network for its whole life. The
//! guard refuses any parameter set that is not a catalogued variant, so a
//! client built for testnet cannot quietly talk mainnet semantics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known Bitcoin network variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet3,
    Regtest,
    Signet,
    Simnet,
}

impl Network {
    /// Every catalogued variant.
    pub const ALL: [Network; 5] = [
        Network::Mainnet,
        Network::Testnet3,
        Network::Regtest,
        Network::Signet,
        Network::Simnet,
    ];

    /// Parse a user-facing name. Accepts the common aliases used by
    /// bitcoind (`main`, `test`) and btcd (`mainnet`, `testnet3`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Some(Network::Mainnet),
            "test" | "testnet" | "testnet3" => Some(Network::Testnet3),
            "regtest" => Some(Network::Regtest),
            "signet" => Some(Network::Signet),
            "simnet" => Some(Network::Simnet),
            _ => None,
        }
    }

    /// Look up the variant owning a magic value.
    pub fn from_magic(magic: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.params().magic == magic)
    }

    /// Catalogued parameters for this variant.
    pub fn params(self) -> NetworkParams {
        NetworkParams::for_network(self)
    }

    /// Every `chain` value a node on this network may report in
    /// `getblockchaininfo`: bitcoind's spelling first, then btcd's.
    pub fn chain_names(self) -> &'static [&'static str] {
        match self {
            Network::Mainnet => &["main", "mainnet"],
            Network::Testnet3 => &["test", "testnet3"],
            Network::Regtest => &["regtest"],
            Network::Signet => &["signet"],
            Network::Simnet => &["simnet"],
        }
    }

    /// Variant whose node reports `chain`
    pub fn from_chain_name(chain: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|n| n.chain_names().iter().any(|c| *c == chain))
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
            Network::Simnet => "simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = UnsupportedNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::from_name(s)
            .ok_or_else(|| UnsupportedNetwork::new(format!("unknown network name '{s}'")))
    }
}

/// Immutable parameters identifying one network variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Canonical network name
    pub name: String,
    /// P2P message-start magic (little-endian on the wire)
    pub magic: u32,
    /// Default P2P port
    pub default_p2p_port: u16,
    /// Default JSON-RPC port
    pub default_rpc_port: u16,
    /// Base58 version byte for pay-to-pubkey-hash addresses
    pub pubkey_hash_prefix: u8,
    /// Base58 version byte for pay-to-script-hash addresses
    pub script_hash_prefix: u8,
    /// Human-readable part of bech32 addresses
    pub bech32_hrp: String,
    /// Value of `chain` bitcoind reports in `getblockchaininfo`
    pub chain_name: String,
}

impl NetworkParams {
    /// Catalogued parameters for `network`.
    pub fn for_network(network: Network) -> Self {
        let (magic, p2p, rpc, pkh, sh, hrp, chain) = match network {
            Network::Mainnet => (0xd9b4_bef9, 8333, 8332, 0x00, 0x05, "bc", "main"),
            Network::Testnet3 => (0x0709_110b, 18333, 18332, 0x6f, 0xc4, "tb", "test"),
            Network::Regtest => (0xdab5_bffa, 18444, 18443, 0x6f, 0xc4, "bcrt", "regtest"),
            Network::Signet => (0x40cf_030a, 38333, 38332, 0x6f, 0xc4, "tb", "signet"),
            Network::Simnet => (0x1214_1c16, 18555, 18556, 0x3f, 0x7b, "sb", "simnet"),
        };
        Self {
            name: network.as_str().to_string(),
            magic,
            default_p2p_port: p2p,
            default_rpc_port: rpc,
            pubkey_hash_prefix: pkh,
            script_hash_prefix: sh,
            bech32_hrp: hrp.to_string(),
            chain_name: chain.to_string(),
        }
    }

    /// The catalogued variant these parameters belong to, if any.
    pub fn network(&self) -> Option<Network> {
        Network::from_magic(self.magic).filter(|n| n.params() == *self)
    }

    /// Whether a node reporting `chain` is on this network
    pub fn accepts_chain(&self, chain: &str) -> bool {
        match self.network() {
            Some(network) => network.chain_names().iter().any(|c| *c == chain),
            None => self.chain_name == chain,
        }
    }

    /// Magic bytes in wire order
    pub fn magic_bytes(&self) -> [u8; 4] {
        self.magic.to_le_bytes()
    }
}

/// The requested network does not match any supported variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported network: {reason}")]
pub struct UnsupportedNetwork {
    pub reason: String,
}

impl UnsupportedNetwork {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validate a requested parameter set.
///
/// The value must equal a catalogued variant field for field; a set mixing
/// one network's magic with another's prefixes or ports is rejected. When
/// `override_` is present it must name that same variant. Pure: no I/O, no
/// state.
pub fn validate_network(
    requested: &NetworkParams,
    override_: Option<Network>,
) -> Result<NetworkParams, UnsupportedNetwork> {
    let variant = Network::from_magic(requested.magic).ok_or_else(|| {
        UnsupportedNetwork::new(format!(
            "magic 0x{:08x} ('{}') matches no known network",
            requested.magic, requested.name
        ))
    })?;

    let catalogued = variant.params();
    if *requested != catalogued {
        return Err(UnsupportedNetwork::new(format!(
            "parameters named '{}' carry {} magic but are not self-consistent with it",
            requested.name, variant
        )));
    }

    if let Some(expected) = override_ {
        if expected != variant {
            return Err(UnsupportedNetwork::new(format!(
                "override selects {expected} but parameters describe {variant}"
            )));
        }
    }

    Ok(catalogued)
}
