//! Purchase confirmation email via the Resend API.
//!
//! Sending is guarded by the email send lease (see `email_lease` and the
//! queries around `contract_email_sent_at`); this module only knows how to
//! deliver one email, with bounded retry on transient failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2026")
fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

/// Mask a recipient address for logs: keep the first character and the
/// domain, hide the rest of the local part.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Everything the confirmation email template needs.
pub struct PurchaseEmail<'a> {
    pub to_email: &'a str,
    pub buyer_name: &'a str,
    pub track_title: &'a str,
    pub license_name: &'a str,
    pub amount_cents: i64,
    pub purchased_at: i64,
    /// Where the buyer can download the signed agreement.
    pub contract_url: &'a str,
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Email service using the Resend API.
#[derive(Clone)]
pub struct EmailService {
    api_key: Option<String>,
    from_email: String,
    http_client: Client,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            http_client: Client::new(),
        }
    }

    /// Send the purchase confirmation email.
    ///
    /// Returns an error when no API key is configured or all retries are
    /// exhausted; the caller decides what that means for the lease.
    pub async fn send_purchase_confirmation(&self, email: PurchaseEmail<'_>) -> Result<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AppError::Internal(
                "No Resend API key configured, cannot send confirmation email".into(),
            ));
        };

        let subject = format!("Your {} license for \"{}\"", email.license_name, email.track_title);
        let amount = format!("${}.{:02}", email.amount_cents / 100, email.amount_cents % 100);
        let date = format_date(email.purchased_at);
        let text = format!(
            "Hi {},\n\nThanks for your purchase on {}.\n\nTrack: {}\nLicense: {}\nAmount: {}\n\nYour license agreement is ready:\n{}\n\nKeep this email for your records.",
            email.buyer_name,
            date,
            email.track_title,
            email.license_name,
            amount,
            email.contract_url,
        );

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![email.to_email],
            subject,
            text,
        };

        self.send_request_with_retry(api_key, &request, email.to_email)
            .await
    }

    /// Send a request to Resend with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        to_email: &str,
    ) -> Result<()> {
        let masked = mask_email(to_email);
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    to = %masked,
                    "Retrying confirmation email after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    tracing::info!(
                        attempt,
                        to = %masked,
                        "Purchase confirmation email sent"
                    );
                    return Ok(());
                }
                Err((error, is_transient)) => {
                    if is_transient {
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        tracing::error!(
            to = %masked,
            attempts = RETRY_DELAYS.len() + 1,
            "Confirmation email failed after all retries"
        );
        Err(last_error
            .unwrap_or_else(|| AppError::Internal("Email service error: retries exhausted".into())))
    }

    /// Send a single request to the Resend API.
    ///
    /// Returns Ok(()) on success, or Err((AppError, is_transient)) on failure.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                // Network errors are transient
                (
                    AppError::Internal(format!("Email service error: {}", e)),
                    true,
                )
            })?;

        let status = response.status();

        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                (AppError::Internal("Email service response error".into()), false)
            })?;
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();

            let is_transient = status.as_u16() == 429 || status.is_server_error();

            if is_transient {
                tracing::warn!(
                    status = %status,
                    body = %body,
                    "Resend API returned transient error"
                );
            } else {
                tracing::error!(
                    status = %status,
                    body = %body,
                    "Resend API returned non-transient error"
                );
            }

            Err((
                AppError::Internal(format!("Email service error: {} - {}", status, body)),
                is_transient,
            ))
        }
    }
}
