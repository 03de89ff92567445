use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Value};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use chatmem_rk::rfm_score_at;

use crate::error::{Result, VkcError};
use crate::schema::{pack_embedding, unpack_embedding, ChatRecord, MemoryRecord, RfmMatch, SemanticMatch, EMBEDDING_DIM};
use crate::VectorKvCache;

const MEMORIES_INDEX: &str = "memories_idx";
const CHATS_INDEX: &str = "chats_idx";

fn memory_key(user_id: &str, mem_id: Uuid) -> String {
    format!("memories:{user_id}:{mem_id}")
}

fn chat_key(user_id: &str, chat_id: Uuid) -> String {
    format!("chat:{user_id}:{chat_id}")
}

/// Escapes characters RediSearch treats as tag-query syntax so a `user_id`
/// containing them (UUIDs with hyphens, emails with dots) still matches
/// exactly as a literal tag rather than being parsed as an operator.
fn escape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(
            ch,
            ',' | '.' | '<' | '>' | '{' | '}' | '[' | ']' | '"' | '\'' | ':' | ';' | '!' | '@'
                | '#' | '$' | '%' | '^' | '&' | '*' | '(' | ')' | '-' | '+' | '=' | '~' | '|' | ' '
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Redis + RediSearch-backed [`VectorKvCache`].
///
/// Holds a pooled [`ConnectionManager`] (auto-reconnecting, cheap to clone)
/// shared across every coroutine that touches the cache, per the
/// single-shared-connection resource model.
#[derive(Clone)]
pub struct RedisVkc {
    conn: ConnectionManager,
}

impl RedisVkc {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`) and returns an
    /// adapter ready for use. Does not create the RediSearch indices —
    /// call [`RedisVkc::ensure_indices`] once at startup for that.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Creates the `memories_idx` and `chats_idx` RediSearch indices if they
    /// do not already exist. Idempotent: an "Index already exists" error
    /// from Redis is swallowed, everything else bubbles up.
    pub async fn ensure_indices(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        let create_memories = redis::cmd("FT.CREATE")
            .arg(MEMORIES_INDEX)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg("memories:")
            .arg("SCHEMA")
            .arg("user_id")
            .arg("TAG")
            .arg("rfm_score")
            .arg("NUMERIC")
            .arg("SORTABLE")
            .arg("embedding")
            .arg("VECTOR")
            .arg("FLAT")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(EMBEDDING_DIM)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async::<Value>(&mut conn)
            .await;
        ignore_index_exists(create_memories)?;

        // TEXT, not NUMERIC: the field holds an RFC 3339 string
        // (`store_chat` writes `timestamp.to_rfc3339()`), and a fixed-offset
        // ISO-8601 string sorts chronologically as text.
        let create_chats = redis::cmd("FT.CREATE")
            .arg(CHATS_INDEX)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg("chat:")
            .arg("SCHEMA")
            .arg("user_id")
            .arg("TAG")
            .arg("timestamp")
            .arg("TEXT")
            .arg("SORTABLE")
            .query_async::<Value>(&mut conn)
            .await;
        ignore_index_exists(create_chats)?;

        Ok(())
    }
}

fn ignore_index_exists(res: std::result::Result<Value, redis::RedisError>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("Index already exists") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn memory_hset_args(cmd: &mut redis::Cmd, record: &MemoryRecord) {
    cmd.arg("id")
        .arg(record.id.to_string())
        .arg("user_id")
        .arg(&record.user_id)
        .arg("memory_text")
        .arg(&record.memory_text)
        .arg("embedding")
        .arg(pack_embedding(&record.embedding))
        .arg("magnitude")
        .arg(record.magnitude)
        .arg("frequency")
        .arg(record.frequency)
        .arg("last_used")
        .arg(record.last_used.to_rfc3339())
        .arg("created_at")
        .arg(record.created_at.to_rfc3339())
        .arg("rfm_score")
        .arg(record.rfm_score);
}

/// Flattens a RediSearch `FT.SEARCH` reply into `(key, field_map)` pairs.
///
/// The raw reply shape is `[total, key1, [field1, value1, ...], key2, ...]`.
fn parse_search_reply(value: Value) -> Vec<(String, HashMap<String, String>)> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Vec::new(),
    };
    let mut out = Vec::new();
    let mut i = 1; // skip the leading total-results count
    while i + 1 < items.len() {
        let key = match &items[i] {
            Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::SimpleString(s) => s.clone(),
            _ => {
                i += 1;
                continue;
            }
        };
        let mut fields = HashMap::new();
        if let Value::Array(pairs) = &items[i + 1] {
            let mut j = 0;
            while j + 1 < pairs.len() {
                let field_name = bulk_to_string(&pairs[j]);
                let field_value = bulk_to_string(&pairs[j + 1]);
                fields.insert(field_name, field_value);
                j += 2;
            }
        }
        out.push((key, fields));
        i += 2;
    }
    out
}

fn bulk_to_string(v: &Value) -> String {
    match v {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::SimpleString(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        _ => String::new(),
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }
    Ok(keys)
}

/// Scalar (non-embedding) memory hash fields, in a fixed order matching
/// [`fetch_memory_scalars`] — kept separate from `embedding` so the fetch
/// never has to decode binary float32 bytes as UTF-8.
const MEMORY_SCALAR_FIELDS: &[&str] = &[
    "id", "user_id", "memory_text", "magnitude", "frequency", "last_used", "created_at", "rfm_score",
];

/// Reads every scalar field of a memory hash via `HMGET`, skipping the
/// binary `embedding` field entirely — `HGETALL` would try to decode it as
/// UTF-8 and fail on arbitrary float bytes.
async fn fetch_memory_scalars(conn: &mut ConnectionManager, key: &str) -> Result<HashMap<String, String>> {
    let values: Vec<Option<String>> = redis::cmd("HMGET")
        .arg(key)
        .arg(MEMORY_SCALAR_FIELDS)
        .query_async(conn)
        .await?;
    let mut map = HashMap::new();
    for (field, value) in MEMORY_SCALAR_FIELDS.iter().zip(values.into_iter()) {
        if let Some(v) = value {
            map.insert((*field).to_string(), v);
        }
    }
    Ok(map)
}

/// Decodes the scalar fields of a memory hash. `embedding` is left empty —
/// callers fetch the binary `embedding` field separately and splice it in.
fn hash_to_memory(key: &str, map: HashMap<String, String>) -> Option<MemoryRecord> {
    let id = map.get("id").and_then(|s| s.parse::<Uuid>().ok())?;
    trace!(%key, "decoded memory hash");
    Some(MemoryRecord {
        id,
        user_id: map.get("user_id").cloned().unwrap_or_default(),
        memory_text: map.get("memory_text").cloned().unwrap_or_default(),
        embedding: Vec::new(),
        magnitude: map.get("magnitude").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        frequency: map.get("frequency").and_then(|s| s.parse().ok()).unwrap_or(1),
        last_used: map.get("last_used").map(|s| parse_timestamp(s)).unwrap_or_else(Utc::now),
        created_at: map.get("created_at").map(|s| parse_timestamp(s)).unwrap_or_else(Utc::now),
        rfm_score: map.get("rfm_score").and_then(|s| s.parse().ok()).unwrap_or(0.0),
    })
}

#[async_trait]
impl VectorKvCache for RedisVkc {
    async fn store_memory(&self, record: &MemoryRecord) -> Result<()> {
        if record.user_id.is_empty() {
            return Err(VkcError::EmptyUserId);
        }
        if record.embedding.len() != EMBEDDING_DIM {
            return Err(VkcError::BadEmbeddingDim {
                got: record.embedding.len(),
                expected: EMBEDDING_DIM,
            });
        }
        let key = memory_key(&record.user_id, record.id);
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(&key);
        memory_hset_args(&mut cmd, record);
        cmd.query_async::<()>(&mut conn).await?;
        debug!(%key, "stored memory");
        Ok(())
    }

    async fn store_chat(&self, record: &ChatRecord) -> Result<()> {
        if record.user_id.is_empty() {
            return Err(VkcError::EmptyUserId);
        }
        let key = chat_key(&record.user_id, record.id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("id", record.id.to_string()),
                    ("user_id", record.user_id.clone()),
                    ("user_message", record.user_message.clone()),
                    ("bot_response", record.bot_response.clone()),
                    ("timestamp", record.timestamp.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn knn(
        &self,
        user_id: &str,
        query_vec: &[f32],
        k: usize,
        cutoff: Option<f32>,
        bump_metadata: bool,
    ) -> Result<Vec<SemanticMatch>> {
        if user_id.is_empty() {
            return Err(VkcError::EmptyUserId);
        }
        if query_vec.len() != EMBEDDING_DIM {
            return Err(VkcError::BadEmbeddingDim {
                got: query_vec.len(),
                expected: EMBEDDING_DIM,
            });
        }
        let mut conn = self.conn.clone();
        let query_str = format!("@user_id:{{{}}}=>[KNN {k} @embedding $vec AS score]", escape_tag(user_id));
        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(MEMORIES_INDEX)
            .arg(&query_str)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(pack_embedding(query_vec))
            .arg("SORTBY")
            .arg("score")
            .arg("ASC")
            .arg("RETURN")
            .arg(5)
            .arg("id")
            .arg("memory_text")
            .arg("created_at")
            .arg("last_used")
            .arg("score")
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await?;

        let now = Utc::now();
        let mut results = Vec::new();
        for (key, fields) in parse_search_reply(reply) {
            let mem_id = match fields.get("id").and_then(|s| s.parse::<Uuid>().ok()) {
                Some(id) => id,
                None => continue,
            };
            // RediSearch reports vector distance, not similarity; lower is closer.
            let distance: f32 = fields
                .get("score")
                .or_else(|| fields.get("__embedding_score"))
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0);
            if let Some(cutoff) = cutoff {
                if distance > cutoff {
                    continue;
                }
            }
            let created_at = fields.get("created_at").map(|s| parse_timestamp(s)).unwrap_or(now);
            let last_used_raw = fields.get("last_used").map(|s| parse_timestamp(s)).unwrap_or(now);
            let text = fields.get("memory_text").cloned().unwrap_or_default();

            let last_used = if bump_metadata {
                bump_retrieval_metadata(&mut conn, &key, now).await?
            } else {
                last_used_raw
            };

            results.push(SemanticMatch {
                mem_id,
                text,
                sim: distance,
                created_at,
                last_used,
            });
        }
        Ok(results)
    }

    async fn top_by_rfm(&self, user_id: &str, k: usize) -> Result<Vec<RfmMatch>> {
        if user_id.is_empty() {
            return Err(VkcError::EmptyUserId);
        }
        let mut conn = self.conn.clone();
        let query_str = format!("@user_id:{{{}}}", escape_tag(user_id));
        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(MEMORIES_INDEX)
            .arg(&query_str)
            .arg("SORTBY")
            .arg("rfm_score")
            .arg("DESC")
            .arg("RETURN")
            .arg(2)
            .arg("id")
            .arg("memory_text")
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .query_async(&mut conn)
            .await?;

        let mut results = Vec::new();
        for (key, fields) in parse_search_reply(reply) {
            let mem_id = match fields.get("id").and_then(|s| s.parse::<Uuid>().ok()) {
                Some(id) => id,
                None => continue,
            };
            // rfm_score isn't in RETURN for brevity of the query above; read it
            // straight from the hash so a stale sortable copy never leaks through.
            let rfm_score: f32 = conn.hget::<_, _, Option<String>>(&key, "rfm_score").await?
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            results.push(RfmMatch {
                mem_id,
                text: fields.get("memory_text").cloned().unwrap_or_default(),
                rfm_score,
            });
        }
        Ok(results)
    }

    async fn recent_chats(&self, user_id: &str, m: usize) -> Result<Vec<ChatRecord>> {
        if user_id.is_empty() {
            return Err(VkcError::EmptyUserId);
        }
        let mut conn = self.conn.clone();
        let query_str = format!("@user_id:{{{}}}", escape_tag(user_id));
        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(CHATS_INDEX)
            .arg(&query_str)
            .arg("SORTBY")
            .arg("timestamp")
            .arg("DESC")
            .arg("LIMIT")
            .arg(0)
            .arg(m)
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::new();
        for (_key, fields) in parse_search_reply(reply) {
            let id = match fields.get("id").and_then(|s| s.parse::<Uuid>().ok()) {
                Some(id) => id,
                None => continue,
            };
            records.push(ChatRecord {
                id,
                user_id: user_id.to_string(),
                user_message: fields.get("user_message").cloned().unwrap_or_default(),
                bot_response: fields.get("bot_response").cloned().unwrap_or_default(),
                timestamp: fields.get("timestamp").map(|s| parse_timestamp(s)).unwrap_or_else(Utc::now),
            });
        }
        // Most-recent-first from Redis; reverse so the caller sees chronological order.
        records.reverse();
        Ok(records)
    }

    async fn get_memory(&self, user_id: &str, mem_id: Uuid) -> Result<Option<MemoryRecord>> {
        let key = memory_key(user_id, mem_id);
        let mut conn = self.conn.clone();
        let map = fetch_memory_scalars(&mut conn, &key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let embedding_bytes: Option<Vec<u8>> = conn.hget(&key, "embedding").await?;
        let mut record = match hash_to_memory(&key, map) {
            Some(r) => r,
            None => {
                warn!(%key, "memory hash missing required id field");
                return Ok(None);
            }
        };
        record.embedding = embedding_bytes.map(|b| unpack_embedding(&b)).unwrap_or_default();
        Ok(Some(record))
    }

    async fn all_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        let mut conn = self.conn.clone();
        let keys = scan_keys(&mut conn, &format!("memories:{user_id}:*")).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let map = fetch_memory_scalars(&mut conn, &key).await?;
            if map.is_empty() {
                continue;
            }
            let embedding_bytes: Option<Vec<u8>> = conn.hget(&key, "embedding").await?;
            if let Some(mut record) = hash_to_memory(&key, map) {
                record.embedding = embedding_bytes.map(|b| unpack_embedding(&b)).unwrap_or_default();
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn all_chats(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let mut conn = self.conn.clone();
        let keys = scan_keys(&mut conn, &format!("chat:{user_id}:*")).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let map: HashMap<String, String> = conn.hgetall(&key).await?;
            if map.is_empty() {
                continue;
            }
            let id = match map.get("id").and_then(|s| s.parse::<Uuid>().ok()) {
                Some(id) => id,
                None => continue,
            };
            out.push(ChatRecord {
                id,
                user_id: map.get("user_id").cloned().unwrap_or_default(),
                user_message: map.get("user_message").cloned().unwrap_or_default(),
                bot_response: map.get("bot_response").cloned().unwrap_or_default(),
                timestamp: map.get("timestamp").map(|s| parse_timestamp(s)).unwrap_or_else(Utc::now),
            });
        }
        Ok(out)
    }

    async fn purge(&self, user_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut keys = scan_keys(&mut conn, &format!("memories:{user_id}:*")).await?;
        keys.extend(scan_keys(&mut conn, &format!("chat:{user_id}:*")).await?);
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

async fn bump_retrieval_metadata(
    conn: &mut ConnectionManager,
    key: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let new_freq: i64 = conn.hincr(key, "frequency", 1).await?;
    let _: () = conn.hset(key, "last_used", now.to_rfc3339()).await?;
    let magnitude: f32 = conn
        .hget::<_, _, Option<String>>(key, "magnitude")
        .await?
        .and_then(|s| s.parse().ok())
        .unwrap_or(1.0);
    let rfm = rfm_score_at(now, new_freq.max(0) as u32, magnitude, now);
    let _: () = conn.hset(key, "rfm_score", rfm).await?;
    trace!(%key, new_freq, rfm, "bumped retrieval metadata");
    Ok(now)
}
