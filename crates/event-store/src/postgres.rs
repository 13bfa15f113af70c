use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, validate_events_for_append},
};

/// Name of the unique index on `events (aggregate_id, version)`.
const UNIQUE_AGGREGATE_VERSION: &str = "unique_aggregate_version";

/// Rows fetched per round trip while streaming a history.
const READ_PAGE_SIZE: i64 = 256;

/// PostgreSQL-backed event store.
///
/// Events live in the `events` table, snapshots in `snapshots` (one row per
/// aggregate). The unique constraint on `(aggregate_id, version)` is what
/// finally decides a race between two writers.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store on a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
        })
    }

    async fn fetch_page(
        pool: &PgPool,
        aggregate_id: AggregateId,
        after: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, aggregate_type, version, timestamp, payload
            FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            LIMIT $3
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(after.as_i64())
        .bind(READ_PAGE_SIZE)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

/// Paging state of one `read_events` stream.
struct ReadCursor {
    pool: PgPool,
    aggregate_id: AggregateId,
    after: Version,
    buffered: VecDeque<EventEnvelope>,
    exhausted: bool,
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version> {
        validate_events_for_append(aggregate_id, expected_version, &events)?;

        let mut tx = self.pool.begin().await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;

        let actual = current_version.map_or(Version::initial(), Version::new);
        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let mut last_version = expected_version;
        for event in &events {
            let inserted = sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                // A concurrent writer committed this version between our
                // MAX(version) read and the insert.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some(UNIQUE_AGGREGATE_VERSION)
                {
                    tx.rollback().await?;
                    let actual = self
                        .get_aggregate_version(aggregate_id)
                        .await?
                        .unwrap_or(Version::initial());
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual,
                    });
                }
                return Err(EventStoreError::Database(e));
            }

            last_version = event.version;
        }

        tx.commit().await?;
        Ok(last_version)
    }

    async fn read_events(&self, aggregate_id: AggregateId, after: Version) -> Result<EventStream> {
        let cursor = ReadCursor {
            pool: self.pool.clone(),
            aggregate_id,
            after,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        let events = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.buffered.is_empty() && !cursor.exhausted {
                let page = Self::fetch_page(&cursor.pool, cursor.aggregate_id, cursor.after).await?;
                cursor.exhausted = (page.len() as i64) < READ_PAGE_SIZE;
                if let Some(last) = page.last() {
                    cursor.after = last.version;
                }
                cursor.buffered.extend(page);
            }

            Ok::<_, EventStoreError>(cursor.buffered.pop_front().map(|event| (event, cursor)))
        });

        Ok(Box::pin(events))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, timestamp, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                state = EXCLUDED.state
            WHERE snapshots.version <= EXCLUDED.version
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.timestamp)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, timestamp, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Snapshot> {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
