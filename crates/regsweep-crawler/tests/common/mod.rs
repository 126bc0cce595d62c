#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use regsweep_crawler::{
    CheckpointStore, CrawlerConfig, Crawler, EntityStore, FetchClient, FetchLimiter,
    MemoryCheckpointStore, MemoryEntityStore, MemoryErrorCounter, RegistryConfig, RequestConfig,
    RetryPolicy,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const SEARCH: &str = "/GetComplexSearchMatchingEntities";
pub const DETAIL: &str = "/GetEntityRecordByID";
pub const HISTORY: &str = "/GetNameHistoryByID";

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_backoff_ms: 10,
        max_jitter_ms: 0,
    }
}

pub fn request_config() -> RequestConfig {
    RequestConfig {
        timeout_secs: 2.0,
        ..Default::default()
    }
}

pub fn client(counter: Arc<MemoryErrorCounter>) -> FetchClient {
    FetchClient::new(&request_config(), fast_retry(), FetchLimiter::new(8), counter).unwrap()
}

/// Two-letter alphabet, two-character prefixes: AA, AB, BA, BB.
pub fn config(server: &MockServer) -> CrawlerConfig {
    CrawlerConfig {
        registry: RegistryConfig {
            base_url: server.uri(),
            ..Default::default()
        },
        request: request_config(),
        retry: fast_retry(),
        prefix_alphabet: "AB".into(),
        prefix_length: 2,
        ..Default::default()
    }
}

pub struct Harness {
    pub server: MockServer,
    pub counter: Arc<MemoryErrorCounter>,
    pub entities: Arc<MemoryEntityStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            counter: Arc::new(MemoryErrorCounter::new()),
            entities: Arc::new(MemoryEntityStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    pub fn crawler(&self, config: CrawlerConfig) -> Crawler {
        self.crawler_with_store(config, self.entities.clone())
    }

    pub fn crawler_with_store(&self, config: CrawlerConfig, entities: Arc<dyn EntityStore>) -> Crawler {
        let client = client(self.counter.clone());
        let checkpoints: Arc<dyn CheckpointStore> = self.checkpoints.clone();
        Crawler::new(config, client, entities, checkpoints).unwrap()
    }

    /// Search for `prefix` answers with `results`.
    pub async fn search(&self, prefix: &str, results: Value) {
        Mock::given(method("POST"))
            .and(path(SEARCH))
            .and(body_partial_json(json!({ "searchValue": prefix })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "entitySearchResultList": results })),
            )
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Every other search answers with an empty list.
    pub async fn empty_searches(&self) {
        Mock::given(method("POST"))
            .and(path(SEARCH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entitySearchResultList": [] })))
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    pub async fn detail(&self, dos_id: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(DETAIL))
            .and(body_partial_json(json!({ "SearchID": dos_id })))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn history(&self, dos_id: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(HISTORY))
            .and(body_partial_json(json!({ "SearchID": dos_id })))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn requests_to(&self, endpoint: &str) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r: &&Request| r.url.path() == endpoint)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    pub async fn searched_prefixes(&self) -> Vec<String> {
        self.requests_to(SEARCH)
            .await
            .iter()
            .map(|body| body["searchValue"].as_str().unwrap().to_string())
            .collect()
    }
}

pub fn hit(dos_id: &str, name: &str, filed: &str) -> Value {
    json!({ "dosID": dos_id, "entityName": name, "initialFilingDate": filed })
}

pub fn detail_body(dos_id: &str, name: &str) -> Value {
    json!({
        "entityGeneralInfo": {
            "dosID": dos_id,
            "entityName": name,
            "entityType": "DOMESTIC BUSINESS CORPORATION",
            "entityStatus": "Active",
            "dateOfInitialDosFiling": "2024-06-10T00:00:00"
        },
        "sopAddress": { "address": { "streetAddress": "1 STATE ST", "city": "ALBANY", "state": "NY", "zipCode": "12207" } },
        "ceo": { "name": "PAT SMITH" }
    })
}
