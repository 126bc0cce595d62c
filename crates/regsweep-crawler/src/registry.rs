//! Request bodies understood by the registry's public inquiry API.

use serde_json::{json, Value};

use crate::config::RegistryConfig;

/// "Name contains `prefix`" search over every entity status.
pub fn search_payload(registry: &RegistryConfig, prefix: &str) -> Value {
    json!({
        "searchValue": prefix,
        "searchByTypeIndicator": "EntityName",
        "searchExpressionIndicator": "CONTAINS",
        "entityStatusIndicator": "AllStatuses",
        "entityTypeIndicator": registry.entity_types,
        "listPaginationInfo": pagination(registry.page_size),
    })
}

pub fn detail_payload(dos_id: &str, entity_name: &str) -> Value {
    json!({
        "SearchID": dos_id,
        "EntityName": entity_name,
        "AssumedNameFlag": "false",
    })
}

pub fn history_payload(registry: &RegistryConfig, dos_id: &str, entity_name: &str) -> Value {
    json!({
        "SearchID": dos_id,
        "AssumedNameFlag": "false",
        "ListSortedBy": "ALL",
        "EntityName": entity_name,
        "listPaginationInfo": pagination(registry.page_size),
    })
}

fn pagination(page_size: u32) -> Value {
    json!({ "listStartRecord": 1, "listEndRecord": page_size })
}

/// Raw items of a search response, empty when the shape is unexpected.
pub fn search_results(body: &Value) -> Vec<Value> {
    body.get("entitySearchResultList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
