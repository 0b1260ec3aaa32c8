//! Downstream notifier for the contract-generation collaborator.
//!
//! Purchase completion commits first, then pings the contract service to
//! render the license agreement PDF. The ping is fire-and-forget: a failed
//! or slow contract service must never roll back or fail a committed
//! purchase. The service retries on its own schedule (and operators can
//! re-trigger manually), so nothing here retries synchronously inside the
//! webhook path.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};

/// Client timeout for the notification POST.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Serialize)]
struct NotifyPayload<'a> {
    purchase_id: &'a str,
}

/// Client for the contract-generation service.
#[derive(Clone)]
pub struct ContractClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl ContractClient {
    pub fn new(endpoint: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            token: token.to_string(),
        }
    }

    /// Ask the contract service to generate the agreement for a purchase.
    /// 2xx is success; anything else is an error for the caller to log.
    pub async fn notify_purchase(&self, purchase_id: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&NotifyPayload { purchase_id })
            .timeout(NOTIFY_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Contract service error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Contract service returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Spawn a fire-and-forget contract notification.
///
/// No-op when the contract service is not configured. All failures are
/// logged with full context and swallowed; panics in the spawned task are
/// logged rather than silently dropped.
pub fn spawn_contract_notification(contracts: Option<ContractClient>, purchase_id: String) {
    let Some(client) = contracts else {
        tracing::debug!(
            purchase_id = %purchase_id,
            "Contract service not configured, skipping notification"
        );
        return;
    };

    let log_id = purchase_id.clone();
    tokio::spawn(
        AssertUnwindSafe(async move {
            match client.notify_purchase(&purchase_id).await {
                Ok(()) => {
                    tracing::info!(
                        purchase_id = %purchase_id,
                        "Contract generation notified"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        purchase_id = %purchase_id,
                        error = %e,
                        "Contract notification failed (purchase is committed; \
                         contract can be re-triggered)"
                    );
                }
            }
        })
        .catch_unwind()
        .map(move |result| {
            if let Err(panic) = result {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    "Contract notification task panicked for purchase {}: {}",
                    log_id,
                    panic_msg
                );
            }
        }),
    );
}
