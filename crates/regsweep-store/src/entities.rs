use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use regsweep_crawler::store::dedup_batch;
use regsweep_crawler::{Address, EntityRecord, EntityStore, PersistOutcome};
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

const COLUMNS: &str = "source_state, entity_number, entity_name, entity_type, entity_subtype, \
    status, registration_date, last_filing_date, expiration_date, jurisdiction, \
    principal_street, principal_city, principal_state, principal_postal_code, principal_country, \
    mailing_street, mailing_city, mailing_state, mailing_postal_code, mailing_country, \
    agent_name, agent_street, agent_city, agent_state, agent_postal_code, agent_country, \
    business_purpose, incorporator_name, previous_names, source_detail_url, source_last_seen_at";

/// Postgres allows 65535 bind parameters per statement; each row binds 31.
const ROWS_PER_STATEMENT: usize = 2000;

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn persist(&self, records: &[EntityRecord]) -> Result<PersistOutcome> {
        let rows = dedup_batch(records);
        if rows.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;
        let mut inserted = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut query = QueryBuilder::<Postgres>::new(format!("INSERT INTO companies ({COLUMNS}) "));
            query.push_values(chunk, |mut b, r| {
                b.push_bind(r.source_state.clone())
                    .push_bind(r.entity_number)
                    .push_bind(r.entity_name.clone())
                    .push_bind(r.entity_type.clone())
                    .push_bind(r.entity_subtype.clone())
                    .push_bind(r.status.clone())
                    .push_bind(r.registration_date)
                    .push_bind(r.last_filing_date)
                    .push_bind(r.expiration_date)
                    .push_bind(r.jurisdiction.clone());
                bind_address(&mut b, &r.principal);
                bind_address(&mut b, &r.mailing);
                b.push_bind(r.agent_name.clone());
                bind_address(&mut b, &r.agent);
                b.push_bind(r.business_purpose.clone())
                    .push_bind(r.incorporator_name.clone())
                    .push_bind(r.previous_names.clone())
                    .push_bind(r.source_detail_url.clone())
                    .push_bind(r.source_last_seen_at);
            });
            query.push(" ON CONFLICT (entity_number) DO NOTHING");

            inserted += query
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert companies")?
                .rows_affected() as usize;
        }
        tx.commit().await.context("Failed to commit companies")?;

        Ok(PersistOutcome {
            inserted,
            skipped: records.len() - inserted,
        })
    }

    async fn seen_on(&self, day: NaiveDate, jurisdiction: &str) -> Result<Vec<EntityRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM companies
            WHERE source_state = $1
              AND (source_last_seen_at AT TIME ZONE 'UTC')::date = $2
            ORDER BY entity_number
            "#
        ))
        .bind(jurisdiction)
        .bind(day)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {jurisdiction} companies seen on {day}"))?;

        rows.iter()
            .map(|r| from_row(r).context("Malformed companies row"))
            .collect()
    }
}

fn bind_address(b: &mut Separated<'_, '_, Postgres, &'static str>, address: &Address) {
    b.push_bind(address.street.clone())
        .push_bind(address.city.clone())
        .push_bind(address.region.clone())
        .push_bind(address.postal_code.clone())
        .push_bind(address.country.clone());
}

fn address(r: &PgRow, prefix: &str) -> Result<Address, sqlx::Error> {
    let field = |name: &str| r.try_get::<Option<String>, _>(format!("{prefix}_{name}").as_str());
    Ok(Address {
        street: field("street")?,
        city: field("city")?,
        region: field("state")?,
        postal_code: field("postal_code")?,
        country: field("country")?,
    })
}

fn from_row(r: &PgRow) -> Result<EntityRecord, sqlx::Error> {
    Ok(EntityRecord {
        source_state: r.try_get("source_state")?,
        entity_number: r.try_get("entity_number")?,
        entity_name: r.try_get("entity_name")?,
        entity_type: r.try_get("entity_type")?,
        entity_subtype: r.try_get("entity_subtype")?,
        status: r.try_get("status")?,
        registration_date: r.try_get("registration_date")?,
        last_filing_date: r.try_get("last_filing_date")?,
        expiration_date: r.try_get("expiration_date")?,
        jurisdiction: r.try_get("jurisdiction")?,
        principal: address(r, "principal")?,
        mailing: address(r, "mailing")?,
        agent_name: r.try_get("agent_name")?,
        agent: address(r, "agent")?,
        business_purpose: r.try_get("business_purpose")?,
        incorporator_name: r.try_get("incorporator_name")?,
        previous_names: r.try_get("previous_names")?,
        source_detail_url: r.try_get("source_detail_url")?,
        source_last_seen_at: r.try_get("source_last_seen_at")?,
    })
}
