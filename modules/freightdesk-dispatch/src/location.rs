use std::sync::Arc;

use tracing::{info, warn};

use freightdesk_common::{FreightDeskError, SearchFilter, VehicleLocationState};

use crate::traits::LocationProvider;

/// Where a resolved origin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginSource {
    /// Typed into the filter by the dispatcher.
    Explicit,
    /// The registry's last known address for the vehicle.
    CachedAddress,
    /// Fetched live from the GPS provider.
    LiveGps,
    /// Nothing to go on; the backend applies its own default location.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrigin {
    pub origin: Option<String>,
    pub source: OriginSource,
}

impl ResolvedOrigin {
    fn found(origin: &str, source: OriginSource) -> Self {
        Self {
            origin: Some(origin.to_string()),
            source,
        }
    }

    fn unresolved() -> Self {
        Self {
            origin: None,
            source: OriginSource::Unresolved,
        }
    }
}

/// Picks the search origin, first match wins:
/// explicit filter origin, cached vehicle address, live GPS fetch, nothing.
pub struct LocationResolver {
    provider: Arc<dyn LocationProvider>,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the origin for a run. The GPS fetch is the only await point.
    /// A failed or empty fetch is a resolution error; no origin is guessed.
    pub async fn resolve(
        &self,
        filter: &SearchFilter,
        vehicle: Option<&VehicleLocationState>,
    ) -> Result<ResolvedOrigin, FreightDeskError> {
        if let Some(origin) = filter.origin() {
            return Ok(ResolvedOrigin::found(origin, OriginSource::Explicit));
        }

        let Some(vehicle) = vehicle else {
            return Ok(ResolvedOrigin::unresolved());
        };

        if let Some(address) = vehicle.cached_address() {
            info!(vehicle_id = vehicle.vehicle_id, address, "Using cached vehicle address");
            return Ok(ResolvedOrigin::found(address, OriginSource::CachedAddress));
        }

        let Some(gps_code) = vehicle.gps_code() else {
            info!(
                vehicle_id = vehicle.vehicle_id,
                "Vehicle has no address and no GPS code, leaving origin to the backend"
            );
            return Ok(ResolvedOrigin::unresolved());
        };

        info!(vehicle_id = vehicle.vehicle_id, gps_code, "Fetching live vehicle location");
        let location = self
            .provider
            .fetch_vehicle_location(vehicle.vehicle_id)
            .await
            .map_err(|e| {
                warn!(vehicle_id = vehicle.vehicle_id, error = %e, "GPS fetch failed");
                gps_error(vehicle.vehicle_id)
            })?;

        match location.address.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(address) => {
                info!(vehicle_id = vehicle.vehicle_id, address, "Live GPS location found");
                Ok(ResolvedOrigin::found(address, OriginSource::LiveGps))
            }
            None => {
                warn!(vehicle_id = vehicle.vehicle_id, "GPS provider returned no address");
                Err(gps_error(vehicle.vehicle_id))
            }
        }
    }
}

fn gps_error(vehicle_id: i64) -> FreightDeskError {
    FreightDeskError::Resolution(format!(
        "Could not fetch live GPS location for truck {vehicle_id}. Please check GPS settings."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLocationProvider;

    fn vehicle(address: Option<&str>, gps_code: Option<&str>) -> VehicleLocationState {
        VehicleLocationState {
            vehicle_id: 4,
            vehicle_gps_code: gps_code.map(String::from),
            last_known_address: address.map(String::from),
            last_updated_at: None,
        }
    }

    #[tokio::test]
    async fn explicit_origin_wins_without_consulting_vehicle() {
        let provider = Arc::new(MockLocationProvider::new().on_vehicle(4, "CZ, Brno"));
        let resolver = LocationResolver::new(provider.clone());
        let filter = SearchFilter::route("SK, 82106", "PL, Warsaw");

        for v in [
            vehicle(Some("AT, Wien"), Some("GD-1")),
            vehicle(None, Some("GD-1")),
            vehicle(None, None),
        ] {
            let resolved = resolver.resolve(&filter, Some(&v)).await.unwrap();
            assert_eq!(resolved.origin.as_deref(), Some("SK, 82106"));
            assert_eq!(resolved.source, OriginSource::Explicit);
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn cached_address_beats_live_fetch() {
        let provider = Arc::new(MockLocationProvider::new().on_vehicle(4, "CZ, Brno"));
        let resolver = LocationResolver::new(provider.clone());

        let resolved = resolver
            .resolve(&SearchFilter::default(), Some(&vehicle(Some("AT, Wien"), Some("GD-1"))))
            .await
            .unwrap();
        assert_eq!(resolved.origin.as_deref(), Some("AT, Wien"));
        assert_eq!(resolved.source, OriginSource::CachedAddress);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn gps_code_without_cache_fetches_live() {
        let provider = Arc::new(MockLocationProvider::new().on_vehicle(4, "CZ, Brno"));
        let resolver = LocationResolver::new(provider.clone());

        let resolved = resolver
            .resolve(&SearchFilter::default(), Some(&vehicle(None, Some("GD-1"))))
            .await
            .unwrap();
        assert_eq!(resolved.origin.as_deref(), Some("CZ, Brno"));
        assert_eq!(resolved.source, OriginSource::LiveGps);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn nothing_to_go_on_makes_no_network_call() {
        let provider = Arc::new(MockLocationProvider::new());
        let resolver = LocationResolver::new(provider.clone());

        let with_bare_vehicle = resolver
            .resolve(&SearchFilter::default(), Some(&vehicle(None, Some("  "))))
            .await
            .unwrap();
        let without_vehicle = resolver.resolve(&SearchFilter::default(), None).await.unwrap();

        assert_eq!(with_bare_vehicle, ResolvedOrigin::unresolved());
        assert_eq!(without_vehicle, ResolvedOrigin::unresolved());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_a_resolution_error() {
        let provider = Arc::new(MockLocationProvider::new().failing());
        let resolver = LocationResolver::new(provider);

        let err = resolver
            .resolve(&SearchFilter::default(), Some(&vehicle(None, Some("GD-1"))))
            .await
            .unwrap_err();
        match err {
            FreightDeskError::Resolution(msg) => assert!(msg.contains("GPS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_address_from_provider_is_an_error() {
        let provider = Arc::new(MockLocationProvider::new().on_vehicle(4, " "));
        let resolver = LocationResolver::new(provider);

        let result = resolver
            .resolve(&SearchFilter::default(), Some(&vehicle(None, Some("GD-1"))))
            .await;
        assert!(matches!(result, Err(FreightDeskError::Resolution(_))));
    }
}
