use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assemble::{parse_date, safe_str};

/// One registered business entity as observed in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub source_state: String,
    pub entity_number: i64,
    pub entity_name: String,
    pub entity_type: String,
    pub entity_subtype: Option<String>,
    pub status: String,
    pub registration_date: Option<NaiveDate>,
    pub last_filing_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub jurisdiction: Option<String>,
    pub principal: Address,
    pub mailing: Address,
    pub agent_name: Option<String>,
    pub agent: Address,
    pub business_purpose: Option<String>,
    pub incorporator_name: Option<String>,
    pub previous_names: Vec<String>,
    pub source_detail_url: String,
    pub source_last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One item of a search response, kept as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity(pub Value);

impl RawEntity {
    pub fn dos_id(&self) -> Option<String> {
        safe_str(&self.0, &["dosID"])
    }

    pub fn entity_name(&self) -> Option<String> {
        safe_str(&self.0, &["entityName"])
    }

    pub fn initial_filing_date(&self) -> Option<NaiveDate> {
        safe_str(&self.0, &["initialFilingDate"]).and_then(|s| parse_date(&s))
    }
}

impl From<Value> for RawEntity {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
