//! License resolution for purchase fulfillment.
//!
//! Checkout events do not always carry a clean license reference: older
//! storefront builds sent only a display name, and the oldest sent a
//! "license type" string that predates the catalog ids. Resolution is an
//! ordered list of independent, pure lookup strategies over the catalog -
//! the first strategy returning a row wins.

use crate::error::{AppError, Result};
use crate::models::License;

/// Name of the catalog row non-exclusive purchases default to.
const STANDARD_LICENSE_NAME: &str = "standard";

/// What the event (and the track) tell us about the wanted license.
#[derive(Debug, Default, Clone)]
pub struct LicenseQuery<'a> {
    pub explicit_license_id: Option<&'a str>,
    pub explicit_license_name: Option<&'a str>,
    /// Backward-compatible alias sent by pre-catalog storefront builds.
    pub legacy_license_type: Option<&'a str>,
    pub track_is_exclusive: bool,
}

type Strategy = for<'a> fn(&LicenseQuery<'_>, &'a [License]) -> Option<&'a License>;

/// Resolution order; first match wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("explicit_id", by_explicit_id),
    ("explicit_name", by_explicit_name),
    ("legacy_type", by_legacy_type),
    ("product_default", by_product_default),
    ("earliest_created", by_earliest_created),
];

fn by_explicit_id<'a>(query: &LicenseQuery<'_>, catalog: &'a [License]) -> Option<&'a License> {
    let id = query.explicit_license_id?;
    catalog.iter().find(|l| l.id == id)
}

fn name_match<'a>(name: &str, catalog: &'a [License]) -> Option<&'a License> {
    catalog.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}

fn by_explicit_name<'a>(query: &LicenseQuery<'_>, catalog: &'a [License]) -> Option<&'a License> {
    name_match(query.explicit_license_name?, catalog)
}

fn by_legacy_type<'a>(query: &LicenseQuery<'_>, catalog: &'a [License]) -> Option<&'a License> {
    name_match(query.legacy_license_type?, catalog)
}

/// Default when the event names nothing: exclusive tracks take the
/// highest-priced exclusive-capable row, everything else takes "standard".
fn by_product_default<'a>(query: &LicenseQuery<'_>, catalog: &'a [License]) -> Option<&'a License> {
    if query.track_is_exclusive {
        catalog
            .iter()
            .filter(|l| l.exclusive_allowed)
            .max_by_key(|l| l.price_cents)
    } else {
        name_match(STANDARD_LICENSE_NAME, catalog)
    }
}

fn by_earliest_created<'a>(
    _query: &LicenseQuery<'_>,
    catalog: &'a [License],
) -> Option<&'a License> {
    catalog.iter().min_by_key(|l| l.created_at)
}

/// Resolve the license for a purchase against the catalog.
///
/// Post-condition: an exclusive track must end up on an
/// `exclusive_allowed` license. Anything else is a typed
/// `LicenseIncompatible` rejection, never a silent substitution.
pub fn resolve_license<'a>(
    query: &LicenseQuery<'_>,
    catalog: &'a [License],
    track_id: &str,
) -> Result<&'a License> {
    let (strategy_name, license) = STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(query, catalog).map(|l| (*name, l)))
        .ok_or_else(|| AppError::Internal(crate::error::msg::EMPTY_LICENSE_CATALOG.into()))?;

    tracing::debug!(
        license_id = %license.id,
        license_name = %license.name,
        strategy = strategy_name,
        "Resolved purchase license"
    );

    if query.track_is_exclusive && !license.exclusive_allowed {
        return Err(AppError::LicenseIncompatible {
            license_id: license.id.clone(),
            track_id: track_id.to_string(),
        });
    }

    Ok(license)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn license(id: &str, name: &str, price: i64, exclusive: bool, created: i64) -> License {
        License {
            id: id.to_string(),
            name: name.to_string(),
            price_cents: price,
            exclusive_allowed: exclusive,
            max_streams: None,
            max_copies: None,
            created_at: created,
        }
    }

    fn catalog() -> Vec<License> {
        vec![
            license("lic_std", "Standard", 2999, false, 100),
            license("lic_prem", "Premium", 9999, true, 200),
            license("lic_excl", "Exclusive", 49999, true, 300),
        ]
    }

    #[test]
    fn test_explicit_id_wins_over_name() {
        let catalog = catalog();
        let query = LicenseQuery {
            explicit_license_id: Some("lic_prem"),
            explicit_license_name: Some("Exclusive"),
            ..Default::default()
        };
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_prem");
    }

    #[test]
    fn test_unknown_id_falls_through_to_name() {
        let catalog = catalog();
        let query = LicenseQuery {
            explicit_license_id: Some("lic_gone"),
            explicit_license_name: Some("premium"),
            ..Default::default()
        };
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_prem");
    }

    #[test]
    fn test_name_match_is_case_insensitive_and_skips_default() {
        let catalog = catalog();
        // A matching name must not fall through to the default branch.
        let query = LicenseQuery {
            explicit_license_name: Some("STANDARD"),
            track_is_exclusive: false,
            ..Default::default()
        };
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_std");
    }

    #[test]
    fn test_legacy_type_alias() {
        let catalog = catalog();
        let query = LicenseQuery {
            legacy_license_type: Some("premium"),
            ..Default::default()
        };
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_prem");
    }

    #[test]
    fn test_exclusive_default_is_highest_priced_exclusive_capable() {
        let catalog = catalog();
        let query = LicenseQuery {
            track_is_exclusive: true,
            ..Default::default()
        };
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_excl");
    }

    #[test]
    fn test_non_exclusive_default_is_standard() {
        let catalog = catalog();
        let query = LicenseQuery::default();
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_std");
    }

    #[test]
    fn test_last_resort_is_earliest_created() {
        // No "standard" row and nothing exclusive-capable to default to.
        let catalog = vec![
            license("lic_b", "Basic", 1999, false, 500),
            license("lic_a", "Archive", 999, false, 50),
        ];
        let query = LicenseQuery::default();
        let resolved = resolve_license(&query, &catalog, "trk_1").unwrap();
        assert_eq!(resolved.id, "lic_a");
    }

    #[test]
    fn test_exclusive_track_with_incompatible_license_is_typed_error() {
        let catalog = catalog();
        let query = LicenseQuery {
            explicit_license_name: Some("Standard"),
            track_is_exclusive: true,
            ..Default::default()
        };
        let err = resolve_license(&query, &catalog, "trk_9").unwrap_err();
        assert!(matches!(
            err,
            AppError::LicenseIncompatible { ref license_id, ref track_id }
                if license_id == "lic_std" && track_id == "trk_9"
        ));
    }

    #[test]
    fn test_empty_catalog_errors() {
        let query = LicenseQuery::default();
        assert!(resolve_license(&query, &[], "trk_1").is_err());
    }
}
