mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use common::{day, detail_body, hit, Harness, DETAIL};
use regsweep_crawler::anyhow::{self, bail};
use regsweep_crawler::assemble::build_record;
use regsweep_crawler::{
    Assemble, Assembly, CheckpointStore, CrawlOutcome, EntityRecord, EntityStore, ErrorCounter,
    PersistOutcome, RawEntity,
};
use serde_json::json;
use wiremock::ResponseTemplate;

fn filed(days_ago: i64) -> String {
    (day() - Duration::days(days_ago)).format("%Y-%m-%dT00:00:00").to_string()
}

#[tokio::test]
async fn out_of_window_hits_are_skipped_and_failed_details_still_advance() {
    let h = Harness::start().await;
    h.search("AA", json!([hit("1", "FRESH LLC", &filed(0)), hit("2", "OLD CORP", &filed(30))]))
        .await;
    h.empty_searches().await;
    h.detail("1", ResponseTemplate::new(500)).await;

    let config = regsweep_crawler::CrawlerConfig {
        limit: Some(1),
        ..common::config(&h.server)
    };
    let outcome = h.crawler(config).run(day()).await.unwrap();

    assert!(!outcome.is_completed());
    assert_eq!(outcome.stats().found, 2);
    assert_eq!(outcome.stats().recent, 1);
    assert_eq!(outcome.stats().assembled, 0);
    assert!(h.entities.is_empty());
    assert_eq!(h.checkpoints.load(day(), "NY").await.unwrap().as_deref(), Some("AA"));

    let details = h.requests_to(DETAIL).await;
    assert!(details.iter().all(|body| body["SearchID"] == "1"));
    assert_eq!(details.len(), 3);
    assert_eq!(h.counter.load(), 1);
}

#[tokio::test]
async fn resumes_strictly_after_checkpoint() {
    let h = Harness::start().await;
    h.empty_searches().await;
    h.checkpoints.save(day(), "NY", "AB").await.unwrap();

    let outcome = h.crawler(common::config(&h.server)).run(day()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.stats().start_index, 2);
    assert_eq!(h.searched_prefixes().await, vec!["BA", "BB"]);
    assert_eq!(h.checkpoints.load(day(), "NY").await.unwrap().as_deref(), Some("BB"));
}

#[tokio::test]
async fn stale_checkpoint_is_ignored() {
    let h = Harness::start().await;
    h.empty_searches().await;
    h.checkpoints
        .save(day() - Duration::days(1), "NY", "BA")
        .await
        .unwrap();

    let outcome = h.crawler(common::config(&h.server)).run(day()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(h.searched_prefixes().await, vec!["AA", "AB", "BA", "BB"]);
}

#[tokio::test]
async fn builds_records_with_history_and_absorbs_recrawl() {
    let h = Harness::start().await;
    h.search("AB", json!([hit("700", "NEW NAME INC", &filed(1))])).await;
    h.search("BA", json!([hit("700", "NEW NAME INC", &filed(1))])).await;
    h.empty_searches().await;
    h.detail("700", ResponseTemplate::new(200).set_body_json(detail_body("700", "NEW NAME INC")))
        .await;
    h.history(
        "700",
        ResponseTemplate::new(200).set_body_json(json!({
            "nameHistoryResultList": [{"entityName": "OLD NAME INC"}]
        })),
    )
    .await;

    let outcome = h.crawler(common::config(&h.server)).run(day()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.stats().assembled, 2);
    assert_eq!(outcome.stats().inserted, 1);
    assert_eq!(h.entities.len(), 1);
    let record = h.entities.get(700).unwrap();
    assert_eq!(record.entity_name, "NEW NAME INC");
    assert_eq!(record.previous_names, vec!["OLD NAME INC"]);
    assert_eq!(record.principal.city.as_deref(), Some("ALBANY"));
    assert_eq!(record.incorporator_name.as_deref(), Some("PAT SMITH"));
}

#[tokio::test]
async fn failed_history_keeps_entity() {
    let h = Harness::start().await;
    h.search("AA", json!([hit("42", "ACME", &filed(0))])).await;
    h.empty_searches().await;
    h.detail("42", ResponseTemplate::new(200).set_body_json(detail_body("42", "ACME")))
        .await;
    h.history("42", ResponseTemplate::new(400)).await;

    h.crawler(common::config(&h.server)).run(day()).await.unwrap();

    let record = h.entities.get(42).unwrap();
    assert!(record.previous_names.is_empty());
    assert_eq!(h.counter.load(), 1);
}

#[tokio::test]
async fn search_failure_is_counted_but_not_fatal() {
    let h = Harness::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(common::SEARCH))
        .and(wiremock::matchers::body_partial_json(json!({"searchValue": "AB"})))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&h.server)
        .await;
    h.empty_searches().await;

    let outcome = h.crawler(common::config(&h.server)).run(day()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.stats().prefixes, 4);
    assert_eq!(outcome.stats().search_failures, 1);
    assert_eq!(h.counter.load(), 1);
}

struct PanicsOn(&'static str);

#[async_trait]
impl Assemble for PanicsOn {
    async fn assemble(&self, raw: &RawEntity) -> Assembly {
        let dos_id = raw.dos_id().unwrap();
        if dos_id == self.0 {
            panic!("unexpected shape for {dos_id}");
        }
        let detail = json!({"entityGeneralInfo": {"dosID": dos_id, "entityName": "B"}});
        Assembly::Built(build_record("NY", &detail, "", Utc::now()).unwrap())
    }
}

#[tokio::test]
async fn one_entity_panicking_does_not_lose_its_siblings() {
    let h = Harness::start().await;
    h.search("AA", json!([hit("11", "A", &filed(0)), hit("22", "B", &filed(0))]))
        .await;
    h.empty_searches().await;

    let crawler = h
        .crawler(common::config(&h.server))
        .with_assembler(Arc::new(PanicsOn("11")));
    let outcome = crawler.run(day()).await.unwrap();

    assert!(outcome.is_completed());
    assert!(h.entities.get(11).is_none());
    assert!(h.entities.get(22).is_some());
}

struct BrokenStore;

#[async_trait]
impl EntityStore for BrokenStore {
    async fn persist(&self, _records: &[EntityRecord]) -> anyhow::Result<PersistOutcome> {
        bail!("connection reset")
    }

    async fn seen_on(&self, _day: NaiveDate, _jurisdiction: &str) -> anyhow::Result<Vec<EntityRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn persistence_failure_aborts_and_keeps_last_good_checkpoint() {
    let h = Harness::start().await;
    h.search("BA", json!([hit("5", "E", &filed(0))])).await;
    h.empty_searches().await;
    h.detail("5", ResponseTemplate::new(200).set_body_json(detail_body("5", "E")))
        .await;
    h.history("5", ResponseTemplate::new(200).set_body_json(json!({}))).await;

    let crawler = h.crawler_with_store(common::config(&h.server), Arc::new(BrokenStore));
    let err = crawler.run(day()).await.unwrap_err();

    assert!(format!("{err:#}").contains("connection reset"));
    assert_eq!(h.checkpoints.load(day(), "NY").await.unwrap().as_deref(), Some("AB"));
}

#[tokio::test]
async fn cancelled_crawl_starts_nothing() {
    let h = Harness::start().await;
    h.empty_searches().await;

    let crawler = h.crawler(common::config(&h.server));
    crawler.shutdown_token().cancel();
    let outcome = crawler.run(day()).await.unwrap();

    assert!(matches!(outcome, CrawlOutcome::Interrupted(_)));
    assert_eq!(outcome.stats().prefixes, 0);
    assert!(h.searched_prefixes().await.is_empty());
    assert_eq!(h.checkpoints.load(day(), "NY").await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_prefixes_still_checkpoint_in_order() {
    let h = Harness::start().await;
    h.empty_searches().await;
    let config = regsweep_crawler::CrawlerConfig {
        prefix_concurrency: 3,
        limit: Some(3),
        ..common::config(&h.server)
    };

    let outcome = h.crawler(config).run(day()).await.unwrap();

    assert_eq!(outcome.stats().last_prefix.as_deref(), Some("BA"));
    assert_eq!(h.checkpoints.load(day(), "NY").await.unwrap().as_deref(), Some("BA"));
}
