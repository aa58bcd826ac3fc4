//! Captcha verification.
//!
//! The browser obtains a token from the captcha service; we ask the
//! service's verification endpoint how human the submitter looked and
//! refuse anything below [`MIN_SCORE`].

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CaptchaConfig;

/// Lowest score that counts as human. The comparison is inclusive.
pub const MIN_SCORE: f64 = 0.5;

/// Errors from captcha verification. Both are terminal for the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptchaError {
    /// The service answered, and the answer was "not human enough".
    #[error("captcha validation failed (success: {success}, score: {score})")]
    Rejected {
        /// `success` flag from the service.
        success: bool,
        /// Score from the service (0.0 when absent).
        score: f64,
    },

    /// The service could not be reached or sent something unreadable.
    #[error("captcha service unavailable: {0}")]
    Transport(String),
}

/// The service's answer for one token. Used once, never stored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptchaVerdict {
    /// Whether the token was valid for our site.
    pub success: bool,
    /// Confidence in `[0, 1]` that the submitter is human.
    #[serde(default)]
    pub score: f64,
    /// Service-specific failure codes.
    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,
}

impl CaptchaVerdict {
    /// Applies the acceptance rule: `success` and `score >= MIN_SCORE`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptchaError::Rejected`] otherwise.
    pub fn evaluate(&self) -> Result<f64, CaptchaError> {
        if self.success && self.score >= MIN_SCORE {
            Ok(self.score)
        } else {
            Err(CaptchaError::Rejected {
                success: self.success,
                score: self.score,
            })
        }
    }
}

/// Decides whether a token belongs to a human.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Verifies `token`, returning the score on success.
    async fn verify(&self, token: &str) -> Result<f64, CaptchaError>;
}

/// Verifier backed by a reCAPTCHA-compatible `siteverify` endpoint.
#[derive(Debug, Clone)]
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    config: CaptchaConfig,
}

impl RecaptchaVerifier {
    /// Creates a verifier with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`CaptchaError::Transport`] if the HTTP client cannot be
    /// built (for example, no TLS backend).
    pub fn new(config: CaptchaConfig) -> Result<Self, CaptchaError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("memoryhole/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaptchaError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: &str) -> Result<f64, CaptchaError> {
        let response = self
            .client
            .post(&self.config.verify_url)
            .query(&[
                ("secret", self.config.secret.as_str()),
                ("response", token),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CaptchaError::Transport(e.without_url().to_string()))?;

        let verdict: CaptchaVerdict = response
            .json()
            .await
            .map_err(|e| CaptchaError::Transport(e.without_url().to_string()))?;

        debug!(success = verdict.success, score = verdict.score, "captcha verdict");
        verdict.evaluate().inspect_err(|_| {
            warn!(
                success = verdict.success,
                score = verdict.score,
                error_codes = ?verdict.error_codes,
                "captcha rejected"
            );
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn verdict(success: bool, score: f64) -> CaptchaVerdict {
        CaptchaVerdict {
            success,
            score,
            error_codes: Vec::new(),
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(verdict(true, 0.5).evaluate(), Ok(0.5));
        assert_eq!(verdict(true, 0.9).evaluate(), Ok(0.9));
        assert!(verdict(true, 0.49).evaluate().is_err());
    }

    #[test]
    fn unsuccessful_verdict_fails_regardless_of_score() {
        assert_eq!(
            verdict(false, 1.0).evaluate(),
            Err(CaptchaError::Rejected {
                success: false,
                score: 1.0
            })
        );
    }

    #[test]
    fn missing_score_counts_as_zero() {
        let v: CaptchaVerdict =
            serde_json::from_value(json!({"success": true, "error-codes": []})).unwrap();
        assert_eq!(v.score, 0.0);
        assert!(v.evaluate().is_err());
    }

    /// Fake `siteverify`: token "valid" scores 0.9, "borderline" 0.5,
    /// anything else fails. Requests with the wrong secret fail too.
    async fn fake_siteverify() -> String {
        async fn handler(Query(params): Query<HashMap<String, String>>) -> axum::Json<Value> {
            let secret_ok = params.get("secret").map(String::as_str) == Some("test-secret");
            let body = match params.get("response").map(String::as_str) {
                Some("valid") if secret_ok => json!({"success": true, "score": 0.9}),
                Some("borderline") if secret_ok => json!({"success": true, "score": 0.5}),
                Some("bot") if secret_ok => json!({"success": true, "score": 0.1}),
                _ => json!({"success": false, "error-codes": ["invalid-input-response"]}),
            };
            axum::Json(body)
        }

        let app = Router::new().route("/siteverify", post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/siteverify")
    }

    fn verifier(verify_url: String) -> RecaptchaVerifier {
        RecaptchaVerifier::new(CaptchaConfig {
            secret: "test-secret".into(),
            verify_url,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn verifies_against_endpoint() {
        let url = fake_siteverify().await;
        let verifier = verifier(url);

        assert_eq!(verifier.verify("valid").await, Ok(0.9));
        assert_eq!(verifier.verify("borderline").await, Ok(0.5));
        assert!(matches!(
            verifier.verify("bot").await,
            Err(CaptchaError::Rejected { success: true, .. })
        ));
        assert!(matches!(
            verifier.verify("invalid").await,
            Err(CaptchaError::Rejected { success: false, .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let verifier = verifier(format!("http://{addr}/siteverify"));
        assert!(matches!(
            verifier.verify("valid").await,
            Err(CaptchaError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn http_error_status_is_transport_error() {
        let url = fake_siteverify().await.replace("/siteverify", "/missing");
        assert!(matches!(
            verifier(url).verify("valid").await,
            Err(CaptchaError::Transport(_))
        ));
    }
}
