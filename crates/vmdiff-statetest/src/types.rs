//! Type definitions for the GeneralStateTest json format

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

fn strip_hex(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = strip_hex(s);
    if s.len() % 2 == 1 {
        hex::decode(format!("0{}", s))
    } else {
        hex::decode(s)
    }
}

/// Hex-encoded bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        decode_hex(&s).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

/// 256-bit quantity, hex (0x-prefixed) or decimal on input, hex on output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub U256);

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let s = s.trim();
        let value = if s.starts_with("0x") || s.starts_with("0X") {
            let digits = strip_hex(s);
            if digits.is_empty() {
                Ok(U256::zero())
            } else {
                U256::from_str_radix(digits, 16).map_err(|e| format!("{:?}", e))
            }
        } else {
            U256::from_dec_str(s).map_err(|e| format!("{:?}", e))
        };
        value
            .map(Quantity)
            .map_err(|e| serde::de::Error::custom(format!("invalid quantity {:?}: {}", s, e)))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Quantity(U256::from(v))
    }
}

/// 64-bit quantity, hex or decimal string, or a plain number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity64(pub u64);

impl<'de> Deserialize<'de> for Quantity64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Quantity64(v)),
            Raw::Text(s) => {
                let s = s.trim();
                let parsed = if s.starts_with("0x") || s.starts_with("0X") {
                    let digits = strip_hex(s);
                    if digits.is_empty() {
                        Ok(0)
                    } else {
                        u64::from_str_radix(digits, 16)
                    }
                } else {
                    s.parse()
                };
                parsed
                    .map(Quantity64)
                    .map_err(|e| serde::de::Error::custom(format!("invalid quantity {:?}: {}", s, e)))
            }
        }
    }
}

impl Serialize for Quantity64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

macro_rules! fixed_hex {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl Default for $name {
            fn default() -> Self {
                $name([0u8; $len])
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s: String = Deserialize::deserialize(deserializer)?;
                let bytes = decode_hex(&s).map_err(serde::de::Error::custom)?;
                if bytes.len() > $len {
                    return Err(serde::de::Error::custom(format!(
                        "expected at most {} bytes, got {}",
                        $len,
                        bytes.len()
                    )));
                }
                let mut result = [0u8; $len];
                result[$len - bytes.len()..].copy_from_slice(&bytes);
                Ok($name(result))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
            }
        }
    };
}

fixed_hex!(HexAddress, 20, "Hex-encoded address (20 bytes)");
fixed_hex!(HexH256, 32, "Hex-encoded hash (32 bytes)");

// =============================================================================
// State Test Types
// =============================================================================

/// State test file: test name -> test case
pub type StateTestFile = BTreeMap<String, StateTest>;

/// Single state test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTest {
    /// Block environment
    pub env: StateEnv,
    /// Pre-execution state
    pub pre: BTreeMap<HexAddress, AccountState>,
    /// Transaction parameters
    pub transaction: StateTransaction,
    /// Expected output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<HexBytes>,
    /// Post-execution state expectations per fork
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post: BTreeMap<String, Vec<PostState>>,
}

/// Block environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnv {
    /// Current coinbase
    pub current_coinbase: HexAddress,
    /// Current difficulty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_difficulty: Option<Quantity>,
    /// Current random (post-merge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_random: Option<HexH256>,
    /// Current gas limit
    pub current_gas_limit: Quantity64,
    /// Current block number
    pub current_number: Quantity64,
    /// Current timestamp
    pub current_timestamp: Quantity64,
    /// Previous hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<HexH256>,
    /// Current base fee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_base_fee: Option<Quantity>,
    /// Current excess blob gas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_excess_blob_gas: Option<Quantity64>,
}

/// Transaction with per-index data, gas and value alternatives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransaction {
    /// Gas price (legacy transactions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Quantity>,
    /// Max fee per gas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<Quantity>,
    /// Max priority fee per gas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<Quantity>,
    /// Nonce
    pub nonce: Quantity64,
    /// Recipient; empty for contract creation
    #[serde(default)]
    pub to: String,
    /// Data alternatives
    pub data: Vec<HexBytes>,
    /// Access lists, one per data alternative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_lists: Option<Vec<Option<Vec<AccessListEntry>>>>,
    /// Gas limit alternatives
    pub gas_limit: Vec<Quantity64>,
    /// Value alternatives
    pub value: Vec<Quantity>,
    /// Sender private key
    pub secret_key: HexBytes,
    /// Sender address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<HexAddress>,
    /// Blob hashes (EIP-4844)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<HexH256>>,
    /// Max fee per blob gas (EIP-4844)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_blob_gas: Option<Quantity>,
}

/// Access list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// Address
    pub address: HexAddress,
    /// Storage keys
    pub storage_keys: Vec<HexH256>,
}

/// Expected result for one index combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostState {
    /// Post state root
    pub hash: HexH256,
    /// Logs hash
    #[serde(default)]
    pub logs: HexH256,
    /// Index selector
    pub indexes: IndexSelector,
}

/// Index selector into the transaction alternatives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSelector {
    /// Data index
    pub data: usize,
    /// Gas index
    pub gas: usize,
    /// Value index
    pub value: usize,
}

/// Account state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Balance
    pub balance: Quantity,
    /// Code
    #[serde(default)]
    pub code: HexBytes,
    /// Nonce
    pub nonce: Quantity64,
    /// Storage
    #[serde(default)]
    pub storage: BTreeMap<Quantity, Quantity>,
}
