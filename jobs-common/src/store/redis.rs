//! A [`JobStore`] backed by a shared key-value store, so that many worker
//! processes can claim from and recover the same queue.
//!
//! The wire layout is a handful of well-known keys:
//!   - `ae:job:<id>`        a hash holding every field of a [`Job`]
//!   - `ae:jobs:queue`      a sorted set of claimable job ids, scored by the
//!                          unix-millis instant they become eligible
//!   - `ae:jobs:inprogress` a sorted set of claimed job ids, scored by the
//!                          unix-millis instant they were claimed
//!
//! Every operation that touches more than one key is implemented as a
//! server-side script so the state transition (move between sorted sets,
//! bump the fencing version, rewrite the hash) is atomic from the point of
//! view of any other worker racing to claim or recover the same job.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::job::{CapturedContext, Job, JobStatus};

use super::{validate_new_job, ClaimOutcome, JobStore, StoreError};

const JOB_KEY_PREFIX: &str = "ae:job:";
const QUEUE_KEY: &str = "ae:jobs:queue";
const INPROGRESS_KEY: &str = "ae:jobs:inprogress";

fn job_key(id: Uuid) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

// Guards against two submitters racing to create the same job id: the
// existence check and the write happen inside one script so no other client
// can observe (or create into) the gap between them.
const CREATE_SCRIPT: &str = r#"
local exists = redis.call('EXISTS', KEYS[1])
if exists == 1 then
  return 'DUPLICATE'
end

for i = 4, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end

if ARGV[1] == '1' then
  redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
end

return 'OK'
"#;

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[2], ARGV[1], id)
local jobkey = ARGV[3] .. id
redis.call('HSET', jobkey, 'status', '300', 'worker_id', ARGV[2], 'started_at', ARGV[1], 'last_updated_at', ARGV[1])
local version = redis.call('HINCRBY', jobkey, 'version', 1)
return {id, version}
"#;

const UPDATE_SCRIPT: &str = r#"
local exists = redis.call('EXISTS', KEYS[1])
if exists == 0 then
  return 'NOTFOUND'
end
local current_version = redis.call('HGET', KEYS[1], 'version')
if current_version ~= ARGV[2] then
  return 'CONFLICT'
end

redis.call('HSET', KEYS[1], 'status', ARGV[3], 'last_updated_at', ARGV[7], 'retry_count', ARGV[8])

if ARGV[4] ~= '' then redis.call('HSET', KEYS[1], 'worker_id', ARGV[4]) else redis.call('HDEL', KEYS[1], 'worker_id') end
if ARGV[5] ~= '' then redis.call('HSET', KEYS[1], 'started_at', ARGV[5]) else redis.call('HDEL', KEYS[1], 'started_at') end
if ARGV[6] ~= '' then redis.call('HSET', KEYS[1], 'completed_at', ARGV[6]) else redis.call('HDEL', KEYS[1], 'completed_at') end
if ARGV[9] ~= '' then redis.call('HSET', KEYS[1], 'retry_delay_until', ARGV[9]) else redis.call('HDEL', KEYS[1], 'retry_delay_until') end
if ARGV[10] ~= '' then redis.call('HSET', KEYS[1], 'result', ARGV[10]) else redis.call('HDEL', KEYS[1], 'result') end
if ARGV[11] ~= '' then redis.call('HSET', KEYS[1], 'error', ARGV[11]) else redis.call('HDEL', KEYS[1], 'error') end

redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('ZREM', KEYS[3], ARGV[1])

if ARGV[12] == '1' then
  redis.call('ZADD', KEYS[2], ARGV[13], ARGV[1])
end

return 'OK'
"#;

// A stuck job with retries remaining is re-queued as Scheduled with an
// immediate retry_delay_until; one that has exhausted its budget is marked
// Failed instead, matching the store contract's "otherwise" branch.
const RECOVER_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[2])
local recovered = {}
for _, id in ipairs(ids) do
  local jobkey = ARGV[4] .. id
  local retry_count = tonumber(redis.call('HGET', jobkey, 'retry_count')) or 0
  local max_retries_raw = redis.call('HGET', jobkey, 'max_retries')
  local max_retries = max_retries_raw and tonumber(max_retries_raw) or tonumber(ARGV[5])

  redis.call('ZREM', KEYS[1], id)
  redis.call('HINCRBY', jobkey, 'version', 1)

  if retry_count < max_retries then
    redis.call('HINCRBY', jobkey, 'retry_count', 1)
    redis.call('HSET', jobkey, 'status', '200', 'last_updated_at', ARGV[1], 'retry_delay_until', ARGV[1])
    redis.call('HDEL', jobkey, 'worker_id', 'started_at')
    redis.call('ZADD', KEYS[2], ARGV[1], id)
  else
    redis.call('HSET', jobkey, 'status', '500', 'last_updated_at', ARGV[1], 'error', ARGV[3])
    redis.call('HDEL', jobkey, 'worker_id', 'started_at', 'retry_delay_until')
  end
  table.insert(recovered, id)
end
return recovered
"#;

/// The outcome of the server-side CAS script used by [`JobStore::update`].
enum UpdateScriptOutcome {
    Ok,
    NotFound,
    Conflict,
}

/// The subset of Redis operations the distributed store needs, abstracted
/// so the store can be exercised against an in-memory double in tests
/// without a live server.
#[async_trait]
pub trait RedisOps: Send + Sync {
    /// Create the job hash (and, if `enqueue_score` is set, its queue entry)
    /// unless `id`'s hash already exists. Returns `Ok(false)` on a duplicate
    /// rather than an error so the caller can attach `StoreError::DuplicateJob`
    /// with the id already in hand.
    async fn eval_create(
        &self,
        id: Uuid,
        key: &str,
        fields: &[(&str, String)],
        enqueue_score: Option<i64>,
    ) -> Result<bool, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn eval_claim(
        &self,
        now_millis: i64,
        worker_id: Uuid,
    ) -> Result<Option<(String, u64)>, StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn eval_update(
        &self,
        id: Uuid,
        expected_version: u64,
        status: u16,
        worker_id: Option<Uuid>,
        started_at: Option<i64>,
        completed_at: Option<i64>,
        last_updated_at: i64,
        retry_count: u32,
        retry_delay_until: Option<i64>,
        result: Option<&str>,
        error: Option<&str>,
        requeue_score: Option<i64>,
    ) -> Result<UpdateScriptOutcome, StoreError>;

    async fn eval_recover(
        &self,
        now_millis: i64,
        stuck_before_millis: i64,
        exceeded_retries_error_json: &str,
        default_max_retries: u32,
    ) -> Result<Vec<String>, StoreError>;
}

/// Production backend, talking to a live Redis (or Redis-compatible) server
/// through a multiplexed connection.
pub struct RedisConnection {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisConnection {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeouts(addr, None, None).await
    }

    /// Connect with explicit response/connection timeouts. `None` blocks
    /// indefinitely, matching Redis's own default.
    pub async fn connect_with_timeouts(
        addr: &str,
        response_timeout: Option<std::time::Duration>,
        connection_timeout: Option<std::time::Duration>,
    ) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(addr).map_err(|error| StoreError::Unavailable(error.to_string()))?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl RedisOps for RedisConnection {
    async fn eval_create(
        &self,
        id: Uuid,
        key: &str,
        fields: &[(&str, String)],
        enqueue_score: Option<i64>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let script = redis::Script::new(CREATE_SCRIPT);
        let mut invocation = script
            .key(key)
            .key(QUEUE_KEY)
            .arg(if enqueue_score.is_some() { "1" } else { "0" })
            .arg(enqueue_score.unwrap_or_default())
            .arg(id.to_string());
        for (field, value) in fields {
            invocation = invocation.arg(*field).arg(value);
        }

        let reply: String = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;

        match reply.as_str() {
            "OK" => Ok(true),
            "DUPLICATE" => Ok(false),
            other => Err(StoreError::Unavailable(format!(
                "unexpected reply from create script: {other}"
            ))),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.connection.clone();
        conn.hgetall(key)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))
    }

    async fn eval_claim(
        &self,
        now_millis: i64,
        worker_id: Uuid,
    ) -> Result<Option<(String, u64)>, StoreError> {
        let mut conn = self.connection.clone();
        let result: redis::Value = redis::Script::new(CLAIM_SCRIPT)
            .key(QUEUE_KEY)
            .key(INPROGRESS_KEY)
            .arg(now_millis)
            .arg(worker_id.to_string())
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;

        match result {
            redis::Value::Nil => Ok(None),
            redis::Value::Bulk(items) if items.len() == 2 => {
                let id = redis::from_redis_value::<String>(&items[0])
                    .map_err(|error| StoreError::Unavailable(error.to_string()))?;
                let version = redis::from_redis_value::<u64>(&items[1])
                    .map_err(|error| StoreError::Unavailable(error.to_string()))?;
                Ok(Some((id, version)))
            }
            _ => Ok(None),
        }
    }

    async fn eval_update(
        &self,
        id: Uuid,
        expected_version: u64,
        status: u16,
        worker_id: Option<Uuid>,
        started_at: Option<i64>,
        completed_at: Option<i64>,
        last_updated_at: i64,
        retry_count: u32,
        retry_delay_until: Option<i64>,
        result: Option<&str>,
        error: Option<&str>,
        requeue_score: Option<i64>,
    ) -> Result<UpdateScriptOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::Script::new(UPDATE_SCRIPT)
            .key(job_key(id))
            .key(QUEUE_KEY)
            .key(INPROGRESS_KEY)
            .arg(id.to_string())
            .arg(expected_version)
            .arg(status)
            .arg(worker_id.map(|id| id.to_string()).unwrap_or_default())
            .arg(started_at.map(|v| v.to_string()).unwrap_or_default())
            .arg(completed_at.map(|v| v.to_string()).unwrap_or_default())
            .arg(last_updated_at)
            .arg(retry_count)
            .arg(retry_delay_until.map(|v| v.to_string()).unwrap_or_default())
            .arg(result.unwrap_or(""))
            .arg(error.unwrap_or(""))
            .arg(if requeue_score.is_some() { "1" } else { "0" })
            .arg(requeue_score.unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;

        match reply.as_str() {
            "OK" => Ok(UpdateScriptOutcome::Ok),
            "NOTFOUND" => Ok(UpdateScriptOutcome::NotFound),
            "CONFLICT" => Ok(UpdateScriptOutcome::Conflict),
            other => Err(StoreError::Unavailable(format!(
                "unexpected reply from update script: {other}"
            ))),
        }
    }

    async fn eval_recover(
        &self,
        now_millis: i64,
        stuck_before_millis: i64,
        exceeded_retries_error_json: &str,
        default_max_retries: u32,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        redis::Script::new(RECOVER_SCRIPT)
            .key(INPROGRESS_KEY)
            .key(QUEUE_KEY)
            .arg(now_millis)
            .arg(stuck_before_millis)
            .arg(exceeded_retries_error_json)
            .arg(JOB_KEY_PREFIX)
            .arg(default_max_retries)
            .invoke_async(&mut conn)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))
    }
}

/// Distributed job store. Generic over [`RedisOps`] so production code runs
/// against a real server while tests run against [`fake::FakeRedis`].
pub struct DistributedStore<C: RedisOps> {
    conn: C,
}

impl<C: RedisOps> DistributedStore<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    fn queue_score(job: &Job) -> i64 {
        job.retry_delay_until
            .unwrap_or(job.created_at)
            .timestamp_millis()
    }

    fn encode(job: &Job) -> Result<Vec<(&'static str, String)>, StoreError> {
        let mut fields = vec![
            ("id", job.id.to_string()),
            ("name", job.name.clone()),
            ("status", job.status.as_u16().to_string()),
            ("payload", BASE64.encode(&job.payload)),
            ("retry_count", job.retry_count.to_string()),
            ("max_retries", job.max_retries.to_string()),
            ("created_at", job.created_at.timestamp_millis().to_string()),
            (
                "last_updated_at",
                job.last_updated_at.timestamp_millis().to_string(),
            ),
            ("version", job.version.to_string()),
            (
                "context",
                serde_json::to_string(&job.context)
                    .map_err(|error| StoreError::Unavailable(error.to_string()))?,
            ),
        ];
        if let Some(result) = &job.result {
            fields.push(("result", BASE64.encode(result)));
        }
        if let Some(error) = &job.error {
            fields.push((
                "error",
                serde_json::to_string(error)
                    .map_err(|error| StoreError::Unavailable(error.to_string()))?,
            ));
        }
        if let Some(worker_id) = &job.worker_id {
            fields.push(("worker_id", worker_id.to_string()));
        }
        if let Some(started_at) = job.started_at {
            fields.push(("started_at", started_at.timestamp_millis().to_string()));
        }
        if let Some(completed_at) = job.completed_at {
            fields.push(("completed_at", completed_at.timestamp_millis().to_string()));
        }
        if let Some(until) = job.retry_delay_until {
            fields.push(("retry_delay_until", until.timestamp_millis().to_string()));
        }
        Ok(fields)
    }

    fn decode(fields: &HashMap<String, String>) -> Result<Job, StoreError> {
        let get = |key: &str| fields.get(key).cloned();
        let parse_millis = |value: String| -> Result<DateTime<Utc>, StoreError> {
            let millis: i64 = value
                .parse()
                .map_err(|_| StoreError::Unavailable(format!("malformed timestamp {value:?}")))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| StoreError::Unavailable(format!("out of range timestamp {millis}")))
        };

        let id: Uuid = get("id")
            .ok_or_else(|| StoreError::Unavailable("job hash missing id".into()))?
            .parse()
            .map_err(|_| StoreError::Unavailable("job hash has malformed id".into()))?;
        let status_code: u16 = get("status")
            .ok_or_else(|| StoreError::Unavailable("job hash missing status".into()))?
            .parse()
            .map_err(|_| StoreError::Unavailable("job hash has malformed status".into()))?;
        let status = JobStatus::from_u16(status_code)
            .ok_or_else(|| StoreError::Unavailable(format!("unknown status code {status_code}")))?;

        let payload = BASE64
            .decode(
                get("payload")
                    .ok_or_else(|| StoreError::Unavailable("job hash missing payload".into()))?
                    .as_bytes(),
            )
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;

        let context: CapturedContext = match get("context") {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|error| StoreError::Unavailable(error.to_string()))?,
            None => CapturedContext::default(),
        };

        let error = match get("error") {
            Some(raw) if !raw.is_empty() => Some(
                serde_json::from_str(&raw).map_err(|error| StoreError::Unavailable(error.to_string()))?,
            ),
            _ => None,
        };

        let result = match get("result") {
            Some(raw) if !raw.is_empty() => Some(
                BASE64
                    .decode(raw.as_bytes())
                    .map_err(|error| StoreError::Unavailable(error.to_string()))?,
            ),
            _ => None,
        };

        Ok(Job {
            id,
            name: get("name").ok_or_else(|| StoreError::Unavailable("job hash missing name".into()))?,
            status,
            payload,
            result,
            error,
            retry_count: get("retry_count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            max_retries: get("max_retries")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            retry_delay_until: get("retry_delay_until").map(parse_millis).transpose()?,
            worker_id: get("worker_id")
                .map(|v| {
                    v.parse()
                        .map_err(|_| StoreError::Unavailable("job hash has malformed worker_id".into()))
                })
                .transpose()?,
            created_at: parse_millis(
                get("created_at")
                    .ok_or_else(|| StoreError::Unavailable("job hash missing created_at".into()))?,
            )?,
            last_updated_at: parse_millis(get("last_updated_at").ok_or_else(|| {
                StoreError::Unavailable("job hash missing last_updated_at".into())
            })?)?,
            started_at: get("started_at").map(parse_millis).transpose()?,
            completed_at: get("completed_at").map(parse_millis).transpose()?,
            context,
            version: get("version").and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }
}

#[async_trait]
impl<C: RedisOps> JobStore for DistributedStore<C> {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        validate_new_job(&job)?;
        let fields = Self::encode(&job)?;
        let enqueue_score = if job.is_claimable(job.created_at) || job.status == JobStatus::Scheduled {
            Some(Self::queue_score(&job))
        } else {
            None
        };

        let created = self
            .conn
            .eval_create(job.id, &job_key(job.id), &fields, enqueue_score)
            .await?;
        if !created {
            return Err(StoreError::DuplicateJob(job.id));
        }
        Ok(job)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Job, StoreError> {
        let fields = self.conn.hgetall(&job_key(id)).await?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(id));
        }
        Self::decode(&fields)
    }

    async fn update(&self, job: Job) -> Result<Job, StoreError> {
        let requeue_score = if job.status == JobStatus::Scheduled {
            Some(Self::queue_score(&job))
        } else {
            None
        };

        let error_json = job
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;
        let result_b64 = job
            .result
            .as_ref()
            .map(|bytes| BASE64.encode(bytes));

        let outcome = self
            .conn
            .eval_update(
                job.id,
                job.version,
                job.status.as_u16(),
                job.worker_id,
                job.started_at.map(|v| v.timestamp_millis()),
                job.completed_at.map(|v| v.timestamp_millis()),
                job.last_updated_at.timestamp_millis(),
                job.retry_count,
                job.retry_delay_until.map(|v| v.timestamp_millis()),
                result_b64.as_deref(),
                error_json.as_deref(),
                requeue_score,
            )
            .await?;

        match outcome {
            UpdateScriptOutcome::Ok => {
                let mut updated = job;
                updated.version += 1;
                Ok(updated)
            }
            UpdateScriptOutcome::NotFound => Err(StoreError::NotFound(job.id)),
            UpdateScriptOutcome::Conflict => Err(StoreError::ConcurrencyConflict(job.id)),
        }
    }

    async fn claim_next_for_worker(
        &self,
        worker_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let claimed = self.conn.eval_claim(now.timestamp_millis(), worker_id).await?;
        let Some((id, _version)) = claimed else {
            return Ok(ClaimOutcome::NoJob);
        };
        let id: Uuid = id
            .parse()
            .map_err(|_| StoreError::Unavailable("claim script returned malformed id".into()))?;
        let job = self.get_by_id(id).await?;
        Ok(ClaimOutcome::Claimed(job))
    }

    fn supports_recovery(&self) -> bool {
        true
    }

    async fn recover_stuck_jobs(
        &self,
        stuck_after: chrono::Duration,
        now: DateTime<Utc>,
        default_max_retries: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let stuck_before = now - stuck_after;
        let error_json = serde_json::to_string(&crate::error::JobError::exceeded_max_retries())
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;
        let ids = self
            .conn
            .eval_recover(
                now.timestamp_millis(),
                stuck_before.timestamp_millis(),
                &error_json,
                default_max_retries,
            )
            .await?;

        let mut recovered = Vec::with_capacity(ids.len());
        for id in ids {
            let id: Uuid = id
                .parse()
                .map_err(|_| StoreError::Unavailable("recover script returned malformed id".into()))?;
            recovered.push(self.get_by_id(id).await?);
        }
        Ok(recovered)
    }
}

/// An in-memory double for [`RedisOps`], reproducing the claim/update/
/// recover scripts' semantics in Rust so [`DistributedStore`] can be
/// exercised deterministically without a live server.
pub mod fake {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct State {
        hashes: HashMap<String, HashMap<String, String>>,
        queue: BTreeMap<i64, Vec<String>>,
        inprogress: BTreeMap<i64, Vec<String>>,
    }

    #[derive(Default)]
    pub struct FakeRedis {
        state: Mutex<State>,
    }

    impl FakeRedis {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn zrem(set: &mut BTreeMap<i64, Vec<String>>, member: &str) {
        set.retain(|_, members| {
            members.retain(|m| m != member);
            !members.is_empty()
        });
    }

    #[async_trait]
    impl RedisOps for FakeRedis {
        async fn eval_create(
            &self,
            id: Uuid,
            key: &str,
            fields: &[(&str, String)],
            enqueue_score: Option<i64>,
        ) -> Result<bool, StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.hashes.contains_key(key) {
                return Ok(false);
            }
            let hash = state.hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                hash.insert(field.to_string(), value.clone());
            }
            if let Some(score) = enqueue_score {
                let member = id.to_string();
                zrem(&mut state.queue, &member);
                state.queue.entry(score).or_default().push(member);
            }
            Ok(true)
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
            let state = self.state.lock().unwrap();
            Ok(state.hashes.get(key).cloned().unwrap_or_default())
        }

        async fn eval_claim(
            &self,
            now_millis: i64,
            worker_id: Uuid,
        ) -> Result<Option<(String, u64)>, StoreError> {
            let mut state = self.state.lock().unwrap();
            let candidate = state
                .queue
                .range(..=now_millis)
                .next()
                .and_then(|(score, members)| members.first().cloned().map(|m| (*score, m)));

            let Some((score, id)) = candidate else {
                return Ok(None);
            };
            zrem(&mut state.queue, &id);
            state.inprogress.entry(now_millis).or_default().push(id.clone());
            let _ = score;

            let key = job_key(id.parse().unwrap());
            let hash = state.hashes.entry(key).or_default();
            hash.insert("status".into(), JobStatus::InProgress.as_u16().to_string());
            hash.insert("worker_id".into(), worker_id.to_string());
            hash.insert("started_at".into(), now_millis.to_string());
            hash.insert("last_updated_at".into(), now_millis.to_string());
            let version: u64 = hash
                .get("version")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let version = version + 1;
            hash.insert("version".into(), version.to_string());

            Ok(Some((id, version)))
        }

        #[allow(clippy::too_many_arguments)]
        async fn eval_update(
            &self,
            id: Uuid,
            expected_version: u64,
            status: u16,
            worker_id: Option<Uuid>,
            started_at: Option<i64>,
            completed_at: Option<i64>,
            last_updated_at: i64,
            retry_count: u32,
            retry_delay_until: Option<i64>,
            result: Option<&str>,
            error: Option<&str>,
            requeue_score: Option<i64>,
        ) -> Result<UpdateScriptOutcome, StoreError> {
            let mut state = self.state.lock().unwrap();
            let key = job_key(id);
            let Some(hash) = state.hashes.get(&key).cloned() else {
                return Ok(UpdateScriptOutcome::NotFound);
            };
            let current_version: u64 = hash.get("version").and_then(|v| v.parse().ok()).unwrap_or(0);
            if current_version != expected_version {
                return Ok(UpdateScriptOutcome::Conflict);
            }

            let id_str = id.to_string();
            zrem(&mut state.inprogress, &id_str);

            let hash = state.hashes.get_mut(&key).unwrap();
            hash.insert("status".into(), status.to_string());
            hash.insert("last_updated_at".into(), last_updated_at.to_string());
            hash.insert("retry_count".into(), retry_count.to_string());

            macro_rules! set_or_clear {
                ($field:literal, $value:expr) => {
                    match $value {
                        Some(v) => {
                            hash.insert($field.into(), v.to_string());
                        }
                        None => {
                            hash.remove($field);
                        }
                    }
                };
            }
            set_or_clear!("worker_id", worker_id.map(|id| id.to_string()));
            set_or_clear!("started_at", started_at);
            set_or_clear!("completed_at", completed_at);
            set_or_clear!("retry_delay_until", retry_delay_until);
            set_or_clear!("result", result);
            set_or_clear!("error", error);
            hash.insert("version".into(), (current_version + 1).to_string());

            if let Some(score) = requeue_score {
                zrem(&mut state.queue, &id_str);
                state.queue.entry(score).or_default().push(id_str);
            }

            Ok(UpdateScriptOutcome::Ok)
        }

        async fn eval_recover(
            &self,
            now_millis: i64,
            stuck_before_millis: i64,
            exceeded_retries_error_json: &str,
            default_max_retries: u32,
        ) -> Result<Vec<String>, StoreError> {
            let mut state = self.state.lock().unwrap();
            let stuck: Vec<String> = state
                .inprogress
                .range(..=stuck_before_millis)
                .flat_map(|(_, members)| members.clone())
                .collect();

            for id in &stuck {
                zrem(&mut state.inprogress, id);
                let key = job_key(id.parse().unwrap());
                let hash = state.hashes.entry(key).or_default();
                let retry_count: u32 = hash.get("retry_count").and_then(|v| v.parse().ok()).unwrap_or(0);
                let max_retries: u32 = hash
                    .get("max_retries")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_max_retries);
                hash.remove("worker_id");
                hash.remove("started_at");
                hash.insert("last_updated_at".into(), now_millis.to_string());
                let version: u64 = hash.get("version").and_then(|v| v.parse().ok()).unwrap_or(0);
                hash.insert("version".into(), (version + 1).to_string());

                if retry_count < max_retries {
                    hash.insert("retry_count".into(), (retry_count + 1).to_string());
                    hash.insert("status".into(), JobStatus::Scheduled.as_u16().to_string());
                    hash.insert("retry_delay_until".into(), now_millis.to_string());
                    state.queue.entry(now_millis).or_default().push(id.clone());
                } else {
                    hash.insert("status".into(), JobStatus::Failed.as_u16().to_string());
                    hash.insert("error".into(), exceeded_retries_error_json.to_string());
                    hash.remove("retry_delay_until");
                }
            }

            Ok(stuck)
        }
    }
}
