//! Record store on Redis hashes.
//!
//! Layout under `<prefix>`:
//! - `<prefix>:record:<key>`: one hash per record, one field per attribute
//! - `<prefix>:records`: sorted set of record keys scored by submission time (ms)
//!
//! Optional attributes that are unset are stored as empty strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use clipo_models::{Record, RecordKey, RecordStatus, RecordUpdate};

/// Insert the hash and index it, unless the record already exists.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
return 1
"#;

/// Write fields only into an existing hash.
const UPDATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if #ARGV > 0 then
  redis.call('HSET', KEYS[1], unpack(ARGV))
end
return 1
"#;

mod field {
    pub const KEY: &str = "key";
    pub const ORIGINAL_FILENAME: &str = "original_filename";
    pub const STORED_NAME: &str = "stored_name";
    pub const STORED_PATH: &str = "stored_path";
    pub const SUBMITTED_AT: &str = "submitted_at";
    pub const STATUS: &str = "status";
    pub const DURATION_SECONDS: &str = "duration_seconds";
    pub const DURATION_DISPLAY: &str = "duration_display";
    pub const THUMBNAIL_REFERENCE: &str = "thumbnail_reference";
    pub const PROCESSED_AT: &str = "processed_at";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const TASK_REFERENCE: &str = "task_reference";
    pub const ATTEMPT: &str = "attempt";
    pub const ATTEMPTS_REMAINING: &str = "attempts_remaining";
}

/// Record store client.
pub struct RedisRecordStore {
    conn: MultiplexedConnection,
    key_prefix: String,
    create_script: Script,
    update_script: Script,
}

impl RedisRecordStore {
    /// Connect to the Redis server named in `config`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Record store connected to Redis (prefix {})", config.key_prefix);

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            create_script: Script::new(CREATE_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        })
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}:record:{}", self.key_prefix, key)
    }

    fn index_key(&self) -> String {
        format!("{}:records", self.key_prefix)
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn create(&self, record: Record) -> StoreResult<RecordKey> {
        let mut conn = self.conn.clone();

        let mut invocation = self.create_script.prepare_invoke();
        invocation
            .key(self.record_key(record.key.as_str()))
            .key(self.index_key())
            .arg(record.submitted_at.timestamp_millis())
            .arg(record.key.as_str());
        for (name, value) in record_fields(&record) {
            invocation.arg(name).arg(value);
        }

        let created: i32 = invocation.invoke_async(&mut conn).await?;
        if created == 0 {
            return Err(StoreError::AlreadyExists(record.key.to_string()));
        }

        debug!("Created record {}", record.key);
        Ok(record.key)
    }

    async fn update(&self, key: &RecordKey, update: &RecordUpdate) -> StoreResult<()> {
        let mut conn = self.conn.clone();

        let mut invocation = self.update_script.prepare_invoke();
        invocation.key(self.record_key(key.as_str()));
        for (name, value) in update_fields(update) {
            invocation.arg(name).arg(value);
        }

        let updated: i32 = invocation.invoke_async(&mut conn).await?;
        if updated == 0 {
            return Err(StoreError::not_found(key.as_str()));
        }
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.record_key(key.as_str())).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        record_from_fields(key.as_str(), &fields).map(Some)
    }

    async fn list(&self) -> StoreResult<Vec<Record>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.zrevrange(self.index_key(), 0, -1).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.hgetall(self.record_key(key));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(keys.len());
        for (key, fields) in keys.iter().zip(hashes) {
            if fields.is_empty() {
                warn!("Index entry {} has no record hash", key);
                continue;
            }
            records.push(record_from_fields(key, &fields)?);
        }
        Ok(records)
    }
}

fn opt_to_field<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn time_to_field(value: &Option<DateTime<Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Hash fields of a complete record.
fn record_fields(record: &Record) -> Vec<(&'static str, String)> {
    vec![
        (field::KEY, record.key.to_string()),
        (field::ORIGINAL_FILENAME, record.original_filename.clone()),
        (field::STORED_NAME, record.stored_name.clone()),
        (
            field::STORED_PATH,
            record.stored_path.to_string_lossy().into_owned(),
        ),
        (field::SUBMITTED_AT, record.submitted_at.to_rfc3339()),
        (field::STATUS, record.status.as_str().to_string()),
        (field::DURATION_SECONDS, opt_to_field(&record.duration_seconds)),
        (field::DURATION_DISPLAY, opt_to_field(&record.duration_display)),
        (
            field::THUMBNAIL_REFERENCE,
            opt_to_field(&record.thumbnail_reference),
        ),
        (field::PROCESSED_AT, time_to_field(&record.processed_at)),
        (field::ERROR_MESSAGE, opt_to_field(&record.error_message)),
        (field::TASK_REFERENCE, opt_to_field(&record.task_reference)),
        (field::ATTEMPT, record.attempt.to_string()),
        (
            field::ATTEMPTS_REMAINING,
            opt_to_field(&record.attempts_remaining),
        ),
    ]
}

/// Hash fields touched by a partial update.
fn update_fields(update: &RecordUpdate) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();

    if let Some(status) = update.status {
        fields.push((field::STATUS, status.as_str().to_string()));
    }
    if let Some(value) = &update.duration_seconds {
        fields.push((field::DURATION_SECONDS, opt_to_field(value)));
    }
    if let Some(value) = &update.duration_display {
        fields.push((field::DURATION_DISPLAY, opt_to_field(value)));
    }
    if let Some(value) = &update.thumbnail_reference {
        fields.push((field::THUMBNAIL_REFERENCE, opt_to_field(value)));
    }
    if let Some(value) = &update.processed_at {
        fields.push((field::PROCESSED_AT, time_to_field(value)));
    }
    if let Some(value) = &update.error_message {
        fields.push((field::ERROR_MESSAGE, opt_to_field(value)));
    }
    if let Some(value) = &update.task_reference {
        fields.push((field::TASK_REFERENCE, opt_to_field(value)));
    }
    if let Some(attempt) = update.attempt {
        fields.push((field::ATTEMPT, attempt.to_string()));
    }
    if let Some(value) = &update.attempts_remaining {
        fields.push((field::ATTEMPTS_REMAINING, opt_to_field(value)));
    }

    fields
}

struct Fields<'a> {
    key: &'a str,
    map: &'a HashMap<String, String>,
}

impl Fields<'_> {
    fn required(&self, name: &str) -> StoreResult<String> {
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::corrupt(self.key, format!("missing field {}", name)))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.map.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn parsed<T: FromStr>(&self, name: &str) -> StoreResult<Option<T>> {
        self.optional(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    StoreError::corrupt(self.key, format!("bad {} value {:?}", name, raw))
                })
            })
            .transpose()
    }

    fn time(&self, name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        self.optional(name)
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::corrupt(self.key, format!("bad {}: {}", name, e)))
            })
            .transpose()
    }
}

fn record_from_fields(key: &str, map: &HashMap<String, String>) -> StoreResult<Record> {
    let fields = Fields { key, map };

    let submitted_at = fields
        .time(field::SUBMITTED_AT)?
        .ok_or_else(|| StoreError::corrupt(key, "missing field submitted_at"))?;
    let status = fields
        .required(field::STATUS)?
        .parse::<RecordStatus>()
        .map_err(|e| StoreError::corrupt(key, e.to_string()))?;

    Ok(Record {
        key: RecordKey::from_string(key),
        original_filename: fields.required(field::ORIGINAL_FILENAME)?,
        stored_name: fields.required(field::STORED_NAME)?,
        stored_path: PathBuf::from(fields.required(field::STORED_PATH)?),
        submitted_at,
        status,
        duration_seconds: fields.parsed(field::DURATION_SECONDS)?,
        duration_display: fields.optional(field::DURATION_DISPLAY),
        thumbnail_reference: fields.optional(field::THUMBNAIL_REFERENCE),
        processed_at: fields.time(field::PROCESSED_AT)?,
        error_message: fields.optional(field::ERROR_MESSAGE),
        task_reference: fields.optional(field::TASK_REFERENCE),
        attempt: fields.parsed(field::ATTEMPT)?.unwrap_or(0),
        attempts_remaining: fields.parsed(field::ATTEMPTS_REMAINING)?,
    })
}
