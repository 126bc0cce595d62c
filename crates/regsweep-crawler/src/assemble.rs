//! Turns one search hit plus its detail and name-history lookups into an
//! [`EntityRecord`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::fetch::FetchClient;
use crate::record::{Address, EntityRecord, RawEntity};
use crate::registry;

/// Outcome of assembling a single entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembly {
    Built(EntityRecord),
    Dropped {
        dos_id: Option<String>,
        reason: String,
    },
}

impl Assembly {
    pub fn into_record(self) -> Option<EntityRecord> {
        match self {
            Self::Built(record) => Some(record),
            Self::Dropped { .. } => None,
        }
    }
}

/// Builds one record from one search hit.
#[async_trait]
pub trait Assemble: Send + Sync + 'static {
    async fn assemble(&self, raw: &RawEntity) -> Assembly;
}

#[derive(Clone)]
pub struct EntityAssembler {
    client: FetchClient,
    registry: RegistryConfig,
}

impl EntityAssembler {
    pub fn new(client: FetchClient, registry: RegistryConfig) -> Self {
        Self { client, registry }
    }

    async fn previous_names(&self, dos_id: &str, entity_name: &str) -> Vec<String> {
        match self
            .client
            .post_json(
                &self.registry.history_url(),
                &registry::history_payload(&self.registry, dos_id, entity_name),
            )
            .await
        {
            Ok(history) => previous_names(&history),
            Err(e) => {
                log::warn!("Name history unavailable for {dos_id}: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Assemble for EntityAssembler {
    async fn assemble(&self, raw: &RawEntity) -> Assembly {
        let Some(dos_id) = raw.dos_id() else {
            return dropped(None, "search result without dosID");
        };
        let entity_name = raw.entity_name().unwrap_or_default();

        let detail = match self
            .client
            .post_json(
                &self.registry.detail_url(),
                &registry::detail_payload(&dos_id, &entity_name),
            )
            .await
        {
            Ok(detail) => detail,
            Err(e) => {
                log::warn!("Dropping entity {dos_id}: detail lookup failed: {e}");
                return dropped(Some(dos_id), "detail lookup failed");
            }
        };

        if is_blank(&detail) {
            log::warn!("No detail for dosID {dos_id}");
            return dropped(Some(dos_id), "empty detail");
        }

        let Some(mut record) = build_record(
            &self.registry.jurisdiction,
            &detail,
            &entity_name,
            Utc::now(),
        ) else {
            log::warn!("Dropping entity {dos_id}: detail has no usable entity number");
            return dropped(Some(dos_id), "missing entity number");
        };

        record.previous_names = self.previous_names(&dos_id, &entity_name).await;

        log::info!(
            "Prepared entity {} ({})",
            record.entity_number,
            record.entity_name
        );
        Assembly::Built(record)
    }
}

fn dropped(dos_id: Option<String>, reason: &str) -> Assembly {
    Assembly::Dropped {
        dos_id,
        reason: reason.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Maps a detail response to a record. `None` when the response carries no
/// positive entity number.
pub fn build_record(
    source_state: &str,
    detail: &Value,
    fallback_name: &str,
    seen_at: DateTime<Utc>,
) -> Option<EntityRecord> {
    const INFO: &str = "entityGeneralInfo";

    let entity_number = safe_str(detail, &[INFO, "dosID"])?
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)?;

    Some(EntityRecord {
        source_state: source_state.to_string(),
        entity_number,
        entity_name: safe_str(detail, &[INFO, "entityName"])
            .unwrap_or_else(|| fallback_name.to_string()),
        entity_type: safe_str(detail, &[INFO, "entityType"]).unwrap_or_default(),
        entity_subtype: safe_str(detail, &[INFO, "entitySubtype"]),
        status: safe_str(detail, &[INFO, "entityStatus"]).unwrap_or_default(),
        registration_date: safe_date(detail, &[INFO, "dateOfInitialDosFiling"]),
        last_filing_date: safe_date(detail, &[INFO, "nextStatementDueDate"]),
        expiration_date: safe_date(detail, &[INFO, "inactiveDate"]),
        jurisdiction: safe_str(detail, &[INFO, "jurisdiction"]),
        principal: address(detail, "sopAddress"),
        mailing: address(detail, "poExecAddress"),
        agent_name: safe_str(detail, &["registeredAgent", "name"]),
        agent: address(detail, "registeredAgent"),
        business_purpose: None,
        incorporator_name: safe_str(detail, &["ceo", "name"]),
        previous_names: Vec::new(),
        source_detail_url: String::new(),
        source_last_seen_at: seen_at,
    })
}

fn address(detail: &Value, section: &str) -> Address {
    let field = |key: &str| safe_str(detail, &[section, "address", key]);
    Address {
        street: field("streetAddress"),
        city: field("city"),
        region: field("state"),
        postal_code: field("zipCode"),
        country: field("country"),
    }
}

/// Prior names listed in a name-history response, in the order given.
pub fn previous_names(history: &Value) -> Vec<String> {
    let Some(items) = safe_get(history, &["nameHistoryResultList"]).and_then(Value::as_array)
    else {
        log::debug!("Name history response has no result list");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| safe_str(item, &["entityName"]))
        .collect()
}

/// Walks `keys` through nested objects, stopping at the first missing step.
pub fn safe_get<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in keys {
        current = current.as_object()?.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

/// Like [`safe_get`] but yields text: strings as-is, numbers rendered,
/// blanks treated as absent.
pub fn safe_str(value: &Value, keys: &[&str]) -> Option<String> {
    match safe_get(value, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn safe_date(value: &Value, keys: &[&str]) -> Option<NaiveDate> {
    safe_str(value, keys).and_then(|s| parse_date(&s))
}

/// Parses ISO-8601 dates and date-times, falling back to a few common
/// calendar formats. Anything else is `None`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let normalized = match s.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}
