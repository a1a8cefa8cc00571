use crate::lua;
use common::model::{cache_key, collapse_key, task_key, TaskAssignment, PENDING_QUEUE_KEY};
use deadpool_redis::redis::{self, AsyncCommands, Script};
use deadpool_redis::Pool;
use errors::{Result, SchedulerError};
use log::debug;
use metrics::counter;

/// Outcome of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The effective trace id: the caller's own on creation, the in-flight
    /// task's when collapsed.
    pub trace_id: String,
    pub created: bool,
}

/// Thin wrapper over the atomic Lua transitions plus the plain reads the
/// pipeline and watchdog need.
pub struct Scheduler {
    pool: Pool,
    lease_ttl_secs: u64,
    cache_ttl_secs: u64,
    publish_script: Script,
    fetch_script: Script,
    complete_script: Script,
    reclaim_script: Script,
}

impl Scheduler {
    pub fn new(pool: Pool, lease_ttl_secs: u64, cache_ttl_secs: u64) -> Self {
        Scheduler {
            pool,
            lease_ttl_secs,
            cache_ttl_secs,
            publish_script: Script::new(lua::PUBLISH_TASK),
            fetch_script: Script::new(lua::FETCH_TASK),
            complete_script: Script::new(lua::COMPLETE_TASK),
            reclaim_script: Script::new(lua::RECLAIM_TASK),
        }
    }

    pub fn lease_ttl_secs(&self) -> u64 {
        self.lease_ttl_secs
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| SchedulerError::ConnectionFailed.into())
    }

    /// Creates a new task or collapses into the in-flight one for the same
    /// `(user, gallery)` pair.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_task(
        &self,
        trace_id: &str,
        user_id: &str,
        gallery_id: &str,
        gallery_key: &str,
        force: bool,
        free_tier: bool,
        estimated_gp: i64,
    ) -> Result<Published> {
        let mut conn = self.connection().await?;

        let reply: String = self
            .publish_script
            .key(task_key(trace_id))
            .key(collapse_key(user_id, gallery_id))
            .key(PENDING_QUEUE_KEY)
            .arg(trace_id)
            .arg(user_id)
            .arg(gallery_id)
            .arg(flag(force))
            .arg(self.lease_ttl_secs)
            .arg(gallery_key)
            .arg(flag(free_tier))
            .arg(estimated_gp)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;

        let published = publish_outcome(reply, trace_id);
        let result_label = if published.created { "created" } else { "collapsed" };
        counter!("scheduler_publish_total", "result" => result_label).increment(1);
        Ok(published)
    }

    /// Lets a node attempt to claim a pending task. `None` means the task is
    /// gone (already claimed or expired).
    pub async fn fetch_task(
        &self,
        trace_id: &str,
        node_id: &str,
    ) -> Result<Option<TaskAssignment>> {
        let mut conn = self.connection().await?;

        let reply: Vec<String> = self
            .fetch_script
            .key(task_key(trace_id))
            .arg(node_id)
            .arg(self.lease_ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;

        let assignment = parse_fetch_reply(trace_id, reply)?;
        let result_label = if assignment.is_some() { "ok" } else { "gone" };
        counter!("scheduler_fetch_total", "result" => result_label).increment(1);
        Ok(assignment)
    }

    /// Stores the result and publishes the artifact URL to the per-user
    /// cache. `node_id` must still own the lease.
    pub async fn complete_task(
        &self,
        trace_id: &str,
        node_id: &str,
        archive_url: &str,
        actual_gp: i64,
    ) -> Result<()> {
        let mut conn = self.connection().await?;

        let key = task_key(trace_id);
        let (user_id, gallery_id): (Option<String>, Option<String>) = redis::pipe()
            .hget(&key, "user_id")
            .hget(&key, "gallery_id")
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;

        let (user_id, gallery_id) = match (user_id, gallery_id) {
            (Some(u), Some(g)) => (u, g),
            _ => {
                counter!("scheduler_complete_total", "result" => "invalid").increment(1);
                return Err(SchedulerError::InvalidState.into());
            }
        };

        let reply: String = self
            .complete_script
            .key(&key)
            .key(cache_key(&user_id, &gallery_id))
            .key(collapse_key(&user_id, &gallery_id))
            .key(PENDING_QUEUE_KEY)
            .arg(archive_url)
            .arg(self.cache_ttl_secs)
            .arg(node_id)
            .arg(actual_gp)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;

        match reply.as_str() {
            "OK" => {
                counter!("scheduler_complete_total", "result" => "ok").increment(1);
                Ok(())
            }
            "NODE_MISMATCH" => {
                counter!("scheduler_complete_total", "result" => "node_mismatch").increment(1);
                Err(SchedulerError::NodeMismatch.into())
            }
            "INVALID" => {
                counter!("scheduler_complete_total", "result" => "invalid").increment(1);
                Err(SchedulerError::InvalidState.into())
            }
            other => Err(SchedulerError::UnexpectedReply(other.to_string()).into()),
        }
    }

    /// Resets a stale PROCESSING task to PENDING. Returns true when a
    /// transition actually happened.
    pub async fn reclaim_task(
        &self,
        trace_id: &str,
        user_id: &str,
        gallery_id: &str,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;

        let reply: String = self
            .reclaim_script
            .key(task_key(trace_id))
            .key(collapse_key(user_id, gallery_id))
            .key(PENDING_QUEUE_KEY)
            .arg(self.lease_ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;

        let reclaimed = reply == "RECLAIMED";
        if reclaimed {
            counter!("scheduler_reclaim_total").increment(1);
        }
        Ok(reclaimed)
    }

    /// Per-user cache lookup. `None` is a miss.
    pub async fn get_cached(&self, user_id: &str, gallery_id: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let cached: Option<String> = conn
            .get(cache_key(user_id, gallery_id))
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;
        if cached.is_some() {
            debug!("[scheduler] cache hit user={user_id} gallery={gallery_id}");
        }
        Ok(cached)
    }

    pub async fn pending_queue_len(&self) -> Result<i64> {
        let mut conn = self.connection().await?;
        conn.llen(PENDING_QUEUE_KEY)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)).into())
    }

    /// First `limit` entries of the pending queue, oldest first.
    pub(crate) async fn pending_queue_prefix(&self, limit: isize) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        conn.lrange(PENDING_QUEUE_KEY, 0, limit - 1)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)).into())
    }

    /// Remaining TTL plus the hash fields the watchdog needs, in one round
    /// trip. `status` is `None` when the hash expired.
    pub(crate) async fn task_lease_view(
        &self,
        trace_id: &str,
    ) -> Result<(i64, Option<String>, Option<String>, Option<String>)> {
        let mut conn = self.connection().await?;
        let key = task_key(trace_id);
        redis::pipe()
            .ttl(&key)
            .hget(&key, "status")
            .hget(&key, "user_id")
            .hget(&key, "gallery_id")
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)).into())
    }

    /// Drops a queue entry whose task hash no longer exists.
    pub(crate) async fn remove_queue_entry(&self, trace_id: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .lrem(PENDING_QUEUE_KEY, 1, trace_id)
            .await
            .map_err(|e| SchedulerError::ScriptFailed(Box::new(e)))?;
        Ok(())
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn publish_outcome(reply: String, trace_id: &str) -> Published {
    if reply == "CREATED" {
        Published {
            trace_id: trace_id.to_string(),
            created: true,
        }
    } else {
        Published {
            trace_id: reply,
            created: false,
        }
    }
}

fn parse_fetch_reply(trace_id: &str, reply: Vec<String>) -> Result<Option<TaskAssignment>> {
    match reply.first().map(String::as_str) {
        Some("OK") => {
            if reply.len() < 3 {
                return Err(
                    SchedulerError::UnexpectedReply(format!("short fetch reply: {reply:?}"))
                        .into(),
                );
            }
            Ok(Some(TaskAssignment {
                trace_id: trace_id.to_string(),
                gallery_id: reply[1].clone(),
                gallery_key: reply[2].clone(),
            }))
        }
        Some("GONE") | None => Ok(None),
        Some(other) => {
            Err(SchedulerError::UnexpectedReply(format!("fetch reply: {other}")).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_reply_keeps_the_callers_trace() {
        let published = publish_outcome("CREATED".into(), "t-1");
        assert!(published.created);
        assert_eq!(published.trace_id, "t-1");
    }

    #[test]
    fn any_other_reply_is_the_collapsed_trace() {
        let published = publish_outcome("t-original".into(), "t-loser");
        assert!(!published.created);
        assert_eq!(published.trace_id, "t-original");
    }

    #[test]
    fn fetch_reply_ok_carries_the_assignment() {
        let reply = vec!["OK".into(), "42".into(), "a1b2c3d4e5".into()];
        let assignment = parse_fetch_reply("t-1", reply).unwrap().unwrap();
        assert_eq!(assignment.trace_id, "t-1");
        assert_eq!(assignment.gallery_id, "42");
        assert_eq!(assignment.gallery_key, "a1b2c3d4e5");
    }

    #[test]
    fn fetch_reply_gone_is_not_an_error() {
        assert!(parse_fetch_reply("t-1", vec!["GONE".into()])
            .unwrap()
            .is_none());
        assert!(parse_fetch_reply("t-1", vec![]).unwrap().is_none());
    }

    #[test]
    fn short_ok_reply_is_rejected() {
        let reply = vec!["OK".into(), "42".into()];
        assert!(parse_fetch_reply("t-1", reply).is_err());
    }
}
