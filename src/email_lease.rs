//! Tri-state send lease encoded in the single `contract_email_sent_at`
//! column.
//!
//! The column predates any dedicated lease storage, so the claim state is
//! folded into the timestamp itself:
//!
//! - `NULL` - no send ever attempted;
//! - a value at or past [`CLAIM_CUTOFF`] (year 2100) - a claim in
//!   progress; the true claim-start time is the value minus
//!   [`CLAIM_OFFSET_SECS`];
//! - any other value - the genuine send time.
//!
//! Readers that never apply the cutoff check just see a timestamp, which
//! keeps old report queries working. A clean reimplementation would use a
//! dedicated lease column; see DESIGN.md.

/// Offset added to the claim-start time when writing a claim. Large enough
/// that any claim lands far past [`CLAIM_CUTOFF`] for the foreseeable
/// lifetime of this system.
pub const CLAIM_OFFSET_SECS: i64 = 4_000_000_000;

/// 2100-01-01T00:00:00Z. Stored values at or past this are claims, not
/// send times.
pub const CLAIM_CUTOFF: i64 = 4_102_444_800;

/// Decoded state of a non-null `contract_email_sent_at` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailLeaseState {
    /// The confirmation email went out at this time.
    Sent { sent_at: i64 },
    /// A send is (or was) in flight, claimed at this time.
    Claimed { started_at: i64 },
}

/// Encode an in-progress claim taken at `now`.
pub fn encode_claim(now: i64) -> i64 {
    now + CLAIM_OFFSET_SECS
}

/// Decode a stored non-null value.
pub fn classify(value: i64) -> EmailLeaseState {
    if value >= CLAIM_CUTOFF {
        EmailLeaseState::Claimed {
            started_at: value - CLAIM_OFFSET_SECS,
        }
    } else {
        EmailLeaseState::Sent { sent_at: value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_round_trips_start_time() {
        let now = 1_750_000_000;
        let encoded = encode_claim(now);
        assert_eq!(
            classify(encoded),
            EmailLeaseState::Claimed { started_at: now }
        );
    }

    #[test]
    fn test_claim_lands_past_cutoff() {
        // Any claim taken after the Unix epoch must decode as a claim,
        // not as an implausibly-future send time.
        assert!(encode_claim(0) >= CLAIM_CUTOFF);
        assert!(encode_claim(chrono::Utc::now().timestamp()) >= CLAIM_CUTOFF);
    }

    #[test]
    fn test_present_day_timestamp_reads_as_sent() {
        let sent = chrono::Utc::now().timestamp();
        assert_eq!(classify(sent), EmailLeaseState::Sent { sent_at: sent });
    }

    #[test]
    fn test_cutoff_boundary() {
        assert_eq!(
            classify(CLAIM_CUTOFF - 1),
            EmailLeaseState::Sent {
                sent_at: CLAIM_CUTOFF - 1
            }
        );
        assert!(matches!(
            classify(CLAIM_CUTOFF),
            EmailLeaseState::Claimed { .. }
        ));
    }
}
