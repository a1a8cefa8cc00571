use chrono::Utc;
use common::config::UpstreamConfig;
use errors::{ResolveError, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const GP_PER_MB: f64 = 20.0;
const STALE_MULTIPLIER: i64 = 3;
const BYTES_PER_MB: f64 = 1_000_000.0;
const FREE_TIER_WINDOW_SECS: i64 = 365 * 24 * 3600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Quota information for a gallery, derived from upstream metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalleryQuota {
    /// Published within the last year, eligible for the free download path.
    pub free_tier: bool,
    /// Estimated GP cost; also what the user will be charged.
    pub estimated_gp: i64,
}

#[derive(Deserialize)]
struct GdataResponse {
    #[serde(default)]
    gmetadata: Vec<Gmetadata>,
}

#[derive(Deserialize)]
struct Gmetadata {
    posted: String,
    filesize: i64,
    #[serde(default)]
    error: String,
}

/// Client for the upstream metadata API used to estimate cost before
/// freezing funds. Failures abort the parse with no side effects.
pub struct Resolver {
    client: reqwest::Client,
    api_url: String,
    cookie: Option<String>,
}

impl Resolver {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Resolver {
            client,
            api_url: config.api_url.clone(),
            cookie: config.cookie.clone(),
        }
    }

    pub async fn resolve(&self, gallery_id: &str, gallery_key: &str) -> Result<GalleryQuota> {
        let gid: i64 = gallery_id
            .parse()
            .map_err(|_| ResolveError::InvalidGalleryId(gallery_id.to_string()))?;

        let payload = json!({
            "method": "gdata",
            "gidlist": [[gid, gallery_key]],
            "namespace": 1,
        });

        let mut request = self.client.post(&self.api_url).json(&payload);
        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResolveError::Http(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Upstream(format!("status code: {status}")).into());
        }

        let body: GdataResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Decode(Box::new(e)))?;

        let meta = body.gmetadata.first().ok_or(ResolveError::EmptyMetadata)?;
        if !meta.error.is_empty() {
            return Err(ResolveError::Upstream(meta.error.clone()).into());
        }

        let posted: i64 = meta
            .posted
            .parse()
            .map_err(|e: std::num::ParseIntError| ResolveError::Decode(Box::new(e)))?;

        let free_tier = is_recent(posted, Utc::now().timestamp());
        Ok(GalleryQuota {
            free_tier,
            estimated_gp: estimate_gp(meta.filesize, free_tier),
        })
    }
}

/// Free tier covers galleries published within the last year.
fn is_recent(posted_unix: i64, now_unix: i64) -> bool {
    now_unix - posted_unix < FREE_TIER_WINDOW_SECS
}

/// 20 GP per MB rounded up by one, tripled once the gallery falls out of
/// the free-tier window.
fn estimate_gp(filesize: i64, free_tier: bool) -> i64 {
    let mb = filesize as f64 / BYTES_PER_MB;
    let mut gp = (mb * GP_PER_MB) as i64 + 1;
    if !free_tier {
        gp *= STALE_MULTIPLIER;
    }
    gp
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver_for(server: &MockServer) -> Resolver {
        Resolver::new(&UpstreamConfig {
            api_url: format!("{}/api.php", server.uri()),
            cookie: None,
        })
    }

    #[test]
    fn estimate_scales_with_size_and_staleness() {
        // 25 MB -> 501 GP while fresh, tripled when stale.
        assert_eq!(estimate_gp(25_000_000, true), 501);
        assert_eq!(estimate_gp(25_000_000, false), 1503);
        // Tiny galleries still cost at least 1 GP.
        assert_eq!(estimate_gp(0, true), 1);
    }

    #[test]
    fn free_tier_window_is_one_year() {
        let now = 1_700_000_000;
        assert!(is_recent(now - FREE_TIER_WINDOW_SECS + 1, now));
        assert!(!is_recent(now - FREE_TIER_WINDOW_SECS, now));
    }

    #[tokio::test]
    async fn resolve_reads_quota_from_gmetadata() {
        let server = MockServer::start().await;
        let posted = Utc::now().timestamp() - 3600;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "method": "gdata",
                "gidlist": [[42, "a1b2c3d4e5"]],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "gmetadata": [{"posted": posted.to_string(), "filesize": 25_000_000}]
            })))
            .mount(&server)
            .await;

        let quota = resolver_for(&server)
            .resolve("42", "a1b2c3d4e5")
            .await
            .unwrap();
        assert!(quota.free_tier);
        assert_eq!(quota.estimated_gp, 501);
    }

    #[tokio::test]
    async fn upstream_error_field_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "gmetadata": [{"posted": "0", "filesize": 0, "error": "Key mismatch"}]
            })))
            .mount(&server)
            .await;

        let err = resolver_for(&server)
            .resolve("42", "wrong-key")
            .await
            .unwrap_err();
        assert!(err.is_resolve());
        assert!(err.to_string().contains("Key mismatch"));
    }

    #[tokio::test]
    async fn http_failure_is_a_resolve_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = resolver_for(&server)
            .resolve("42", "a1b2c3d4e5")
            .await
            .unwrap_err();
        assert!(err.is_resolve());
    }

    #[tokio::test]
    async fn non_numeric_gallery_id_fails_before_any_request() {
        let server = MockServer::start().await;
        let err = resolver_for(&server)
            .resolve("forty-two", "a1b2c3d4e5")
            .await
            .unwrap_err();
        assert!(err.is_resolve());
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }
}
