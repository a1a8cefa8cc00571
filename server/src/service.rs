use crate::resolver::Resolver;
use crate::store::AuditStore;
use common::model::{ParseRequest, ParseResponse, TaskAnnouncement, TaskResult};
use errors::Result;
use hub::{Announcer, ResultWaiter};
use ledger::LedgerService;
use log::{error, info, warn};
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Orchestrates the full request lifecycle:
///
/// cache check -> resolve -> freeze -> publish (collapsing) -> wait -> settle
///
/// The caller blocks for the duration; the result arrives through the
/// waiter from a node connection.
pub struct GalleryService {
    sched: Arc<Scheduler>,
    hub: Arc<dyn Announcer>,
    waiter: Arc<ResultWaiter>,
    ledger: Arc<LedgerService>,
    store: Arc<AuditStore>,
    resolver: Arc<Resolver>,
    wait_timeout: Duration,
}

impl GalleryService {
    pub fn new(
        sched: Arc<Scheduler>,
        hub: Arc<dyn Announcer>,
        waiter: Arc<ResultWaiter>,
        ledger: Arc<LedgerService>,
        store: Arc<AuditStore>,
        resolver: Arc<Resolver>,
        wait_timeout: Duration,
    ) -> Self {
        GalleryService {
            sched,
            hub,
            waiter,
            ledger,
            store,
            resolver,
            wait_timeout,
        }
    }

    pub async fn parse(&self, user_id: &str, req: &ParseRequest) -> Result<ParseResponse> {
        // Step 1: cache lookup, skipped under force. Read errors degrade to
        // a miss instead of failing the request.
        if !req.force {
            match self.sched.get_cached(user_id, &req.gallery_id).await {
                Ok(Some(archive_url)) => {
                    info!(
                        "[service] cache HIT user={user_id} gallery={}",
                        req.gallery_id
                    );
                    return Ok(ParseResponse::cache_hit(archive_url));
                }
                Ok(None) => {}
                Err(e) => warn!("[service] cache check error: {e}"),
            }
        }

        // Step 2: resolve cost. Failures abort with no side effects.
        let quota = self
            .resolver
            .resolve(&req.gallery_id, &req.gallery_key)
            .await?;

        // Step 3: mint the trace early so the freeze is attributable.
        let trace_id = Uuid::now_v7().to_string();

        // Step 4: freeze the estimate. Denial surfaces as the quota error.
        self.ledger
            .freeze(user_id, &trace_id, quota.estimated_gp)
            .await?;

        // Step 5: publish; the script collapses duplicates.
        let published = match self
            .sched
            .publish_task(
                &trace_id,
                user_id,
                &req.gallery_id,
                &req.gallery_key,
                req.force,
                quota.free_tier,
                quota.estimated_gp,
            )
            .await
        {
            Ok(published) => published,
            Err(e) => {
                self.refund_quietly(user_id, &trace_id, quota.estimated_gp, "publish failure")
                    .await;
                return Err(e);
            }
        };

        if published.created {
            info!(
                "[service] NEW task trace={} user={user_id} gallery={} force={} free={} estGP={}",
                published.trace_id, req.gallery_id, req.force, quota.free_tier, quota.estimated_gp
            );
            self.store.log_task_created(
                &published.trace_id,
                user_id,
                &req.gallery_id,
                &req.gallery_key,
                req.force,
                quota.free_tier,
                quota.estimated_gp,
            );

            let queue_len = self.sched.pending_queue_len().await.unwrap_or(0);
            self.hub.broadcast_announcement(&TaskAnnouncement {
                trace_id: published.trace_id.clone(),
                free_tier: quota.free_tier,
                estimated_gp: quota.estimated_gp,
                queue_len,
            });
        } else {
            info!(
                "[service] COLLAPSED into trace={} user={user_id} gallery={}",
                published.trace_id, req.gallery_id
            );
            // The original publisher carries the reservation for everyone;
            // release this caller's freeze right away.
            self.refund_quietly(user_id, &trace_id, quota.estimated_gp, "collapse")
                .await;
        }

        // Step 6: block on the waiter slot. The slot unregisters on drop and
        // the guard refunds the publisher if this future dies early.
        let mut slot = self.waiter.register(&published.trace_id);
        let mut guard = FreezeGuard::new(
            self.ledger.clone(),
            user_id,
            &published.trace_id,
            quota.estimated_gp,
            published.created,
        );

        let delivered = tokio::select! {
            delivered = slot.recv() => delivered,
            _ = tokio::time::sleep(self.wait_timeout) => {
                guard.refund("timeout").await;
                return Ok(ParseResponse::failed("timeout waiting for node result".into()));
            }
        };

        let result = match delivered {
            Some(result) => result,
            None => {
                guard.refund("empty delivery").await;
                return Ok(ParseResponse::failed("task completed with nil result".into()));
            }
        };

        self.finish(user_id, req, &published.trace_id, published.created, quota.estimated_gp, guard, result)
            .await
    }

    async fn finish(
        &self,
        user_id: &str,
        req: &ParseRequest,
        trace_id: &str,
        created: bool,
        estimated_gp: i64,
        mut guard: FreezeGuard,
        result: TaskResult,
    ) -> Result<ParseResponse> {
        self.store
            .log_task_completed(trace_id, &result.node_id, result.actual_gp);

        if result.success {
            guard.settle(result.actual_gp).await;
        } else {
            guard.refund("task failed").await;
        }

        if !result.success {
            let message = result.error.unwrap_or_else(|| "task failed".to_string());
            return Ok(ParseResponse::failed(message));
        }

        // The complete script wrote the canonical artifact URL; re-read it
        // rather than trusting the in-band copy.
        let archive_url = self
            .sched
            .get_cached(user_id, &req.gallery_id)
            .await
            .unwrap_or_default();

        let gp_cost = if created { estimated_gp } else { 0 };
        Ok(ParseResponse::completed(gp_cost, archive_url))
    }

    async fn refund_quietly(&self, user_id: &str, trace_id: &str, amount: i64, reason: &str) {
        if let Err(e) = self.ledger.refund(user_id, trace_id, amount).await {
            error!("[service] refund error on {reason}: {e}");
        }
    }
}

/// Terminal-state bookkeeping for the publisher's reservation.
///
/// Exactly one of settle or refund must happen per freeze. Collapsed
/// callers construct this disarmed (they refunded at publish time). If the
/// handler future is dropped mid-wait (client went away), `Drop` spawns the
/// refund so the reservation cannot leak.
struct FreezeGuard {
    ledger: Arc<LedgerService>,
    user_id: String,
    trace_id: String,
    amount: i64,
    armed: bool,
}

impl FreezeGuard {
    fn new(
        ledger: Arc<LedgerService>,
        user_id: &str,
        trace_id: &str,
        amount: i64,
        armed: bool,
    ) -> Self {
        FreezeGuard {
            ledger,
            user_id: user_id.to_string(),
            trace_id: trace_id.to_string(),
            amount,
            armed,
        }
    }

    async fn settle(&mut self, actual_gp: i64) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match self
            .ledger
            .settle(&self.user_id, &self.trace_id, self.amount, actual_gp)
            .await
        {
            Ok(_) => info!(
                "[service] settled task trace={} frozen={} actual={actual_gp}",
                self.trace_id, self.amount
            ),
            Err(e) => error!("[service] settle balance error: {e}"),
        }
    }

    async fn refund(&mut self, reason: &str) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match self
            .ledger
            .refund(&self.user_id, &self.trace_id, self.amount)
            .await
        {
            Ok(_) => info!(
                "[service] refunded {} GP for {reason} trace={}",
                self.amount, self.trace_id
            ),
            Err(e) => error!("[service] refund balance error on {reason}: {e}"),
        }
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "[service] caller left mid-wait, refunding trace={}",
            self.trace_id
        );
        let ledger = self.ledger.clone();
        let user_id = std::mem::take(&mut self.user_id);
        let trace_id = std::mem::take(&mut self.trace_id);
        let amount = self.amount;
        tokio::spawn(async move {
            if let Err(e) = ledger.refund(&user_id, &trace_id, amount).await {
                error!("[service] refund balance error on cancellation: {e}");
            }
        });
    }
}
