use crate::config::ProviderConfig;
use async_trait::async_trait;
use errors::{NodeError, Result};
use log::debug;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

/// Snapshot of the node's spending capacity, fed into the claim policy.
#[derive(Debug, Clone, Copy)]
pub struct QuotaStatus {
    pub have_free_quota: bool,
    pub gp_balance: i64,
}

/// What a successful archive-URL generation produced.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub archive_url: String,
    pub actual_gp: i64,
    pub size_mib: f64,
}

/// Contract to the upstream archive backend. The HTML scraping and
/// file-size arithmetic live behind this seam; the runtime only needs the
/// outcome and the quota snapshot.
#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    async fn generate_archive_url(
        &self,
        gallery_id: &str,
        gallery_key: &str,
    ) -> Result<ArchiveOutcome>;

    fn quota_status(&self) -> QuotaStatus;

    /// Re-reads balance and free-quota state from upstream.
    async fn refresh_status(&self) -> Result<()>;

    fn reset_daily_cost(&self);

    fn today_gp_cost(&self) -> i64;
}

#[derive(Deserialize)]
struct ArchiveReply {
    archive_url: String,
    #[serde(default)]
    gp_cost: i64,
    #[serde(default)]
    size_mib: f64,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
struct StatusReply {
    have_free_quota: bool,
    gp_balance: i64,
}

/// HTTP-backed provider speaking the archiver's JSON contract.
pub struct UpstreamProvider {
    client: reqwest::Client,
    archive_url: String,
    status_url: String,
    cookie: Option<String>,
    have_free_quota: AtomicBool,
    gp_balance: AtomicI64,
    today_gp_cost: AtomicI64,
}

impl UpstreamProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        UpstreamProvider {
            client,
            archive_url: config.archive_url.clone(),
            status_url: config.status_url.clone(),
            cookie: config.cookie.clone(),
            have_free_quota: AtomicBool::new(false),
            gp_balance: AtomicI64::new(0),
            today_gp_cost: AtomicI64::new(0),
        }
    }

    fn with_cookie(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cookie {
            Some(cookie) => req.header("Cookie", cookie.as_str()),
            None => req,
        }
    }
}

#[async_trait]
impl ArchiveProvider for UpstreamProvider {
    async fn generate_archive_url(
        &self,
        gallery_id: &str,
        gallery_key: &str,
    ) -> Result<ArchiveOutcome> {
        let request = self.client.post(&self.archive_url).json(&serde_json::json!({
            "gallery_id": gallery_id,
            "gallery_key": gallery_key,
        }));

        let reply: ArchiveReply = self
            .with_cookie(request)
            .send()
            .await
            .map_err(|e| NodeError::Archive(e.to_string()))?
            .json()
            .await
            .map_err(|e| NodeError::Archive(e.to_string()))?;

        if !reply.error.is_empty() {
            return Err(NodeError::Archive(reply.error).into());
        }

        // Generation is what upstream charges for, so account immediately.
        self.gp_balance.fetch_sub(reply.gp_cost, Ordering::Relaxed);
        self.today_gp_cost.fetch_add(reply.gp_cost, Ordering::Relaxed);

        Ok(ArchiveOutcome {
            archive_url: reply.archive_url,
            actual_gp: reply.gp_cost,
            size_mib: reply.size_mib,
        })
    }

    fn quota_status(&self) -> QuotaStatus {
        QuotaStatus {
            have_free_quota: self.have_free_quota.load(Ordering::Relaxed),
            gp_balance: self.gp_balance.load(Ordering::Relaxed),
        }
    }

    async fn refresh_status(&self) -> Result<()> {
        let request = self.client.get(&self.status_url);
        let reply: StatusReply = self
            .with_cookie(request)
            .send()
            .await
            .map_err(|e| NodeError::Archive(e.to_string()))?
            .json()
            .await
            .map_err(|e| NodeError::Archive(e.to_string()))?;

        self.have_free_quota
            .store(reply.have_free_quota, Ordering::Relaxed);
        self.gp_balance.store(reply.gp_balance, Ordering::Relaxed);
        debug!(
            "[node] status refreshed: have_free_quota={}, gp_balance={}",
            reply.have_free_quota, reply.gp_balance
        );
        Ok(())
    }

    fn reset_daily_cost(&self) {
        self.today_gp_cost.store(0, Ordering::Relaxed);
    }

    fn today_gp_cost(&self) -> i64 {
        self.today_gp_cost.load(Ordering::Relaxed)
    }
}
