//! Atomic multi-key transitions for the task state machine.
//!
//! Every state change touches up to three keys at once (task hash, collapse
//! sentinel, pending queue), so each transition runs as a single Lua script.
//! Emulating these with read-modify-write round trips would race against
//! concurrent publishes and reclaims.

/// Creates a task hash unless an identical request is already in flight.
///
/// KEYS[1] = task:{trace_id}
/// KEYS[2] = inflight:{user_id}:{gallery_id}
/// KEYS[3] = queue:pending
/// ARGV    = trace_id, user_id, gallery_id, force, lease_ttl, gallery_key,
///           free_tier, estimated_gp
///
/// Returns "CREATED", or the trace id of the in-flight task this request
/// collapsed into.
pub const PUBLISH_TASK: &str = r#"
local task_key     = KEYS[1]
local collapse_key = KEYS[2]
local queue_key    = KEYS[3]
local trace_id     = ARGV[1]
local user_id      = ARGV[2]
local gallery_id   = ARGV[3]
local force        = ARGV[4]
local lease_ttl    = tonumber(ARGV[5])
local gallery_key  = ARGV[6]
local free_tier    = ARGV[7]
local estimated_gp = ARGV[8]

local existing = redis.call("GET", collapse_key)
if existing then
    -- Only collapse onto a task that is still alive; a sentinel can outlive
    -- its task hash.
    local existing_status = redis.call("HGET", "task:" .. existing, "status")
    if existing_status == "PENDING" or existing_status == "PROCESSING" then
        return existing
    end
    redis.call("DEL", collapse_key)
end

redis.call("HMSET", task_key,
    "trace_id",     trace_id,
    "user_id",      user_id,
    "gallery_id",   gallery_id,
    "gallery_key",  gallery_key,
    "status",       "PENDING",
    "force",        force,
    "free_tier",    free_tier,
    "estimated_gp", estimated_gp,
    "actual_gp",    "0",
    "node_id",      ""
)
redis.call("EXPIRE", task_key, lease_ttl * 3)

redis.call("SET", collapse_key, trace_id, "EX", lease_ttl * 2)
redis.call("RPUSH", queue_key, trace_id)

return "CREATED"
"#;

/// Claims a PENDING task for a node and starts its lease.
///
/// KEYS[1] = task:{trace_id}
/// ARGV    = node_id, lease_ttl
///
/// Returns {"GONE"} when the task is missing or already claimed, otherwise
/// {"OK", gallery_id, gallery_key}. The refreshed TTL is the lease: a node
/// that never reports back lets the hash decay until the watchdog notices.
pub const FETCH_TASK: &str = r#"
local task_key  = KEYS[1]
local node_id   = ARGV[1]
local lease_ttl = tonumber(ARGV[2])

local status = redis.call("HGET", task_key, "status")
if status ~= "PENDING" then
    return {"GONE"}
end

redis.call("HMSET", task_key,
    "status",  "PROCESSING",
    "node_id", node_id
)
redis.call("EXPIRE", task_key, lease_ttl)

local fields = redis.call("HMGET", task_key, "gallery_id", "gallery_key")
return {"OK", fields[1], fields[2]}
"#;

/// Finalizes a PROCESSING task and publishes its artifact to the per-user
/// cache.
///
/// KEYS[1] = task:{trace_id}
/// KEYS[2] = cache:{user_id}:{gallery_id}
/// KEYS[3] = inflight:{user_id}:{gallery_id}
/// KEYS[4] = queue:pending
/// ARGV    = archive_url, cache_ttl, node_id, actual_gp
///
/// Returns "OK", "INVALID" (not PROCESSING), or "NODE_MISMATCH" when the
/// lease moved to another node after a reclaim. The mismatch check is the
/// only thing stopping a reclaimed-then-reassigned task from being
/// overwritten by the original, late node.
pub const COMPLETE_TASK: &str = r#"
local task_key     = KEYS[1]
local cache_key    = KEYS[2]
local collapse_key = KEYS[3]
local queue_key    = KEYS[4]
local archive_url  = ARGV[1]
local cache_ttl    = tonumber(ARGV[2])
local node_id      = ARGV[3]
local actual_gp    = ARGV[4]

local status = redis.call("HGET", task_key, "status")
if status ~= "PROCESSING" then
    return "INVALID"
end

local assigned = redis.call("HGET", task_key, "node_id")
if assigned ~= node_id then
    return "NODE_MISMATCH"
end

redis.call("HMSET", task_key, "status", "COMPLETED", "actual_gp", actual_gp)
-- Keep the hash around briefly for diagnostics.
redis.call("EXPIRE", task_key, 300)

redis.call("SET", cache_key, archive_url, "EX", cache_ttl)
redis.call("DEL", collapse_key)

local trace_id = redis.call("HGET", task_key, "trace_id")
redis.call("LREM", queue_key, 0, trace_id)

return "OK"
"#;

/// Resets a stale PROCESSING task back to PENDING so it can be re-announced.
///
/// KEYS[1] = task:{trace_id}
/// KEYS[2] = inflight:{user_id}:{gallery_id}
/// KEYS[3] = queue:pending
/// ARGV    = lease_ttl
///
/// Returns "RECLAIMED" or "NOT_NEEDED". The collapse sentinel is rewritten
/// so duplicate requests keep collapsing onto the reclaimed trace.
pub const RECLAIM_TASK: &str = r#"
local task_key     = KEYS[1]
local collapse_key = KEYS[2]
local queue_key    = KEYS[3]
local lease_ttl    = tonumber(ARGV[1])

local status = redis.call("HGET", task_key, "status")
if status ~= "PROCESSING" then
    return "NOT_NEEDED"
end

redis.call("HMSET", task_key,
    "status",  "PENDING",
    "node_id", ""
)
redis.call("EXPIRE", task_key, lease_ttl * 3)

local trace_id = redis.call("HGET", task_key, "trace_id")
redis.call("RPUSH", queue_key, trace_id)

redis.call("SET", collapse_key, trace_id, "EX", lease_ttl * 2)

return "RECLAIMED"
"#;
