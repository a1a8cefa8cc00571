use serde::{Deserialize, Serialize};

/// Inbound body of `POST /api/v1/parse`. The user identity comes from the
/// API-key middleware, never from the body.
#[derive(Debug, Clone, Deserialize)]
pub struct ParseRequest {
    pub gallery_id: String,
    pub gallery_key: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseResponse {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gp_cost: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParseResponse {
    pub fn cache_hit(archive_url: String) -> Self {
        ParseResponse {
            cached: true,
            archive_url: Some(archive_url),
            ..Default::default()
        }
    }

    pub fn completed(gp_cost: i64, archive_url: Option<String>) -> Self {
        ParseResponse {
            cached: false,
            gp_cost: Some(gp_cost),
            archive_url,
            ..Default::default()
        }
    }

    pub fn failed(error: String) -> Self {
        ParseResponse {
            cached: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckinResponse {
    pub success: bool,
    pub reward: i64,
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetKeyResponse {
    pub api_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_defaults_to_false() {
        let req: ParseRequest =
            serde_json::from_str(r#"{"gallery_id":"42","gallery_key":"a1b2c3d4e5"}"#).unwrap();
        assert!(!req.force);
    }

    #[test]
    fn cache_hit_response_has_no_cost_field() {
        let body = serde_json::to_string(&ParseResponse::cache_hit("https://a/1.zip".into()))
            .unwrap();
        assert!(body.contains(r#""cached":true"#));
        assert!(!body.contains("gp_cost"));
        assert!(!body.contains("error"));
    }

    #[test]
    fn collapsed_response_keeps_a_zero_cost() {
        let body =
            serde_json::to_string(&ParseResponse::completed(0, Some("https://a/1.zip".into())))
                .unwrap();
        assert!(body.contains(r#""gp_cost":0"#));
    }
}
