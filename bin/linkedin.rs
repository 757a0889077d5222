//! LinkedIn publisher.
//!
//! Posts text shares through the UGC Posts API. Only text shares are
//! supported; media attachments are not.

use std::time::Duration;

use reqwest::StatusCode;
use rotapost::{PublishError, PublishReceipt, Publisher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Header carrying the id of a created entity.
const RESTLI_ID_HEADER: &str = "x-restli-id";

/// Minimal profile returned by `GET /me`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Member id.
    pub id: Option<String>,
    /// First name.
    pub localized_first_name: Option<String>,
    /// Last name.
    pub localized_last_name: Option<String>,
}

/// Publisher posting to a LinkedIn member or organization feed.
#[derive(Debug, Clone)]
pub struct LinkedInPublisher {
    client: reqwest::Client,
    api_base: String,
    author: String,
    token: String,
}

impl LinkedInPublisher {
    /// Creates a new publisher.
    pub fn new(
        api_base: impl Into<String>,
        author: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(format!("cannot build http client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            author: author.into(),
            token: token.into(),
        })
    }

    /// Builds the UGC post body for `text`.
    pub fn share_payload(&self, text: &str) -> Value {
        json!({
            "author": self.author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.api_base))
            .bearer_auth(&self.token)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }
}

fn classify(status: StatusCode, detail: String) -> PublishError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::Unauthorized(detail),
        _ => PublishError::Rejected { status: status.as_u16(), detail },
    }
}

impl Publisher for LinkedInPublisher {
    async fn validate(&self) -> Result<(), PublishError> {
        let response = self
            .request(reqwest::Method::GET, "me")
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify(status, detail));
        }

        let profile: Profile = response.json().await.unwrap_or_default();
        info!(
            first = profile.localized_first_name.as_deref().unwrap_or("?"),
            last = profile.localized_last_name.as_deref().unwrap_or("?"),
            "linkedin token is valid"
        );
        Ok(())
    }

    async fn publish(&self, body: &str) -> Result<PublishReceipt, PublishError> {
        debug!(chars = body.chars().count(), "posting share");
        let response = self
            .request(reqwest::Method::POST, "ugcPosts")
            .json(&self.share_payload(body))
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        let header_id = response
            .headers()
            .get(RESTLI_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify(status, text));
        }

        let body_id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
        Ok(PublishReceipt { post_id: body_id.or(header_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> LinkedInPublisher {
        LinkedInPublisher::new(
            "https://api.example.test/v2/",
            "urn:li:person:abc",
            "token",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_share_payload_shape() {
        let payload = publisher().share_payload("Hello network");
        assert_eq!(payload["author"], "urn:li:person:abc");
        assert_eq!(payload["lifecycleState"], "PUBLISHED");
        let share = &payload["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareCommentary"]["text"], "Hello network");
        assert_eq!(share["shareMediaCategory"], "NONE");
        assert_eq!(payload["visibility"]["com.linkedin.ugc.MemberNetworkVisibility"], "PUBLIC");
    }

    #[test]
    fn test_api_base_is_normalized() {
        assert_eq!(publisher().api_base, "https://api.example.test/v2");
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "expired".into()),
            PublishError::Unauthorized(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "dup".into()),
            PublishError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn test_profile_parse() {
        let profile: Profile =
            serde_json::from_str(r#"{"id":"x","localizedFirstName":"Ada","extra":1}"#).unwrap();
        assert_eq!(profile.localized_first_name.as_deref(), Some("Ada"));
        assert!(profile.localized_last_name.is_none());
    }
}
