//! Built-in application ledgers.
//!
//! Each application owns one ledger and one index projection:
//!
//! | App          | Shape    | Key            | Value                      |
//! |--------------|----------|----------------|----------------------------|
//! | `assets`     | Map      | `tokenId`      | `to` (current owner)       |
//! | `transfers`  | Multimap | `"<from>:<to>"`| `{value, description}`     |
//! | `identities` | Map      | `public_key`   | `{name, description}`      |
//!
//! Asset records are ownership transfers: a token is minted by a record whose
//! `from` is [`MINT_SOURCE`], and afterwards only its current owner may move it.

use std::fmt;
use std::str::FromStr;

use chainlet_core::error::RecordError;
use chainlet_core::{
    ChainRules, IndexConfig, IndexEntry, IndexShape, IndexValue, Record, SecondaryIndex,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// `from` value of an asset record that mints a new token.
pub const MINT_SOURCE: &str = "0";

/// Separator between the two parties of a transfer index key.
const PAIR_SEPARATOR: char = ':';

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum App {
    Assets,
    Transfers,
    Identities,
}

impl App {
    pub const ALL: [App; 3] = [App::Assets, App::Transfers, App::Identities];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::Transfers => "transfers",
            Self::Identities => "identities",
        }
    }

    /// Fields every submitted record must carry.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Assets => &["from", "to", "tokenId"],
            Self::Transfers => &["from", "to", "value", "description"],
            Self::Identities => &["public_key", "name", "description"],
        }
    }

    pub fn index_config(&self) -> IndexConfig {
        match self {
            Self::Assets => IndexConfig::new(IndexShape::Map, project_asset),
            Self::Transfers => IndexConfig::new(IndexShape::Multimap, project_transfer),
            Self::Identities => IndexConfig::new(IndexShape::Map, project_identity),
        }
    }

    /// Admission check for a submitted record.
    ///
    /// Beyond the required fields, asset records are checked against the
    /// committed ownership in `index`, and transfer parties must be strings that
    /// keep the `"<from>:<to>"` index key unambiguous.
    pub fn check_record(
        &self,
        record: &Record,
        index: Option<&SecondaryIndex>,
    ) -> Result<(), RecordError> {
        record.require(self.required_fields())?;
        match self {
            Self::Assets => {
                let token = string_field(record, "tokenId")?;
                let from = string_field(record, "from")?;
                check_ownership(index, token, from)
            }
            Self::Transfers => {
                for field in ["from", "to"] {
                    if string_field(record, field)?.contains(PAIR_SEPARATOR) {
                        return Err(RecordError::InvalidField {
                            field: field.to_string(),
                            reason: format!("must not contain '{PAIR_SEPARATOR}'"),
                        });
                    }
                }
                Ok(())
            }
            Self::Identities => Ok(()),
        }
    }

    /// Chain rules for this application at `difficulty`.
    pub fn rules(&self, difficulty: u32) -> ChainRules {
        ChainRules::new(difficulty).with_index(self.index_config())
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application: {0}")]
pub struct UnknownApp(pub String);

impl FromStr for App {
    type Err = UnknownApp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assets" => Ok(Self::Assets),
            "transfers" => Ok(Self::Transfers),
            "identities" => Ok(Self::Identities),
            other => Err(UnknownApp(other.to_string())),
        }
    }
}

fn string_field<'a>(record: &'a Record, field: &str) -> Result<&'a str, RecordError> {
    record.get_str(field).ok_or_else(|| RecordError::InvalidField {
        field: field.to_string(),
        reason: "must be a string".into(),
    })
}

/// A known token moves only from its owner; an unknown one only from [`MINT_SOURCE`].
fn check_ownership(
    index: Option<&SecondaryIndex>,
    token: &str,
    from: &str,
) -> Result<(), RecordError> {
    let owner = index.and_then(|idx| owner_of(idx, token));
    let allowed = match &owner {
        Some(Value::String(owner)) => owner == from,
        Some(_) => false,
        None => from == MINT_SOURCE,
    };
    if allowed {
        Ok(())
    } else {
        Err(RecordError::NotOwner {
            token: token.to_string(),
            from: from.to_string(),
        })
    }
}

/// Index key of the transfers between `from` and `to`.
pub fn transfer_key(from: &str, to: &str) -> String {
    format!("{from}{PAIR_SEPARATOR}{to}")
}

fn project_asset(record: &Record) -> Vec<IndexEntry> {
    match (record.get_str("tokenId"), record.get("to")) {
        (Some(token), Some(to)) => vec![IndexEntry::new(token, to.clone())],
        _ => vec![],
    }
}

fn project_transfer(record: &Record) -> Vec<IndexEntry> {
    let (Some(from), Some(to)) = (record.get_str("from"), record.get_str("to")) else {
        return vec![];
    };
    let value = json!({
        "value": record.get("value").cloned().unwrap_or(Value::Null),
        "description": record.get("description").cloned().unwrap_or(Value::Null),
    });
    vec![IndexEntry::new(transfer_key(from, to), value)]
}

fn project_identity(record: &Record) -> Vec<IndexEntry> {
    let Some(key) = record.get_str("public_key") else {
        return vec![];
    };
    let value = json!({
        "name": record.get("name").cloned().unwrap_or(Value::Null),
        "description": record.get("description").cloned().unwrap_or(Value::Null),
    });
    vec![IndexEntry::new(key, value)]
}

/// Current owner of an asset, from the asset index.
pub fn owner_of(index: &SecondaryIndex, token_id: &str) -> Option<Value> {
    match index.lookup(token_id)? {
        IndexValue::Single(owner) => Some(owner.clone()),
        IndexValue::Sequence(_) => None,
    }
}

/// Every token currently owned by `owner`, in key order.
pub fn assets_of(index: &SecondaryIndex, owner: &str) -> Vec<String> {
    index
        .iter()
        .filter(|(_, value)| matches!(value, IndexValue::Single(Value::String(o)) if o == owner))
        .map(|(token, _)| token.clone())
        .collect()
}
