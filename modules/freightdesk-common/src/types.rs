use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// --- Dashboard inputs ---

/// Search criteria as entered on the dashboard.
///
/// Dates are in the dashboard's local form (`YYYY-MM-DD`, as produced by a
/// date input). Empty strings are treated the same as absent values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub loading_date_from: Option<String>,
    pub loading_date_to: Option<String>,
    pub unloading_date_from: Option<String>,
    pub unloading_date_to: Option<String>,
}

impl SearchFilter {
    pub fn route(origin: &str, destination: &str) -> Self {
        Self {
            origin: Some(origin.to_string()),
            destination: Some(destination.to_string()),
            ..Default::default()
        }
    }

    /// Trimmed origin, `None` when missing or blank.
    pub fn origin(&self) -> Option<&str> {
        non_blank(self.origin.as_deref())
    }

    /// Trimmed destination, `None` when missing or blank.
    pub fn destination(&self) -> Option<&str> {
        non_blank(self.destination.as_deref())
    }

    pub fn has_route(&self) -> bool {
        self.origin().is_some() || self.destination().is_some()
    }
}

/// A vehicle's GPS state as held by the truck registry. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleLocationState {
    pub vehicle_id: i64,
    pub vehicle_gps_code: Option<String>,
    pub last_known_address: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl VehicleLocationState {
    pub fn cached_address(&self) -> Option<&str> {
        non_blank(self.last_known_address.as_deref())
    }

    pub fn gps_code(&self) -> Option<&str> {
        non_blank(self.vehicle_gps_code.as_deref())
    }
}

// --- Automation backend ---

/// Scrape submission sent to the automation backend. Dates are in the
/// marketplace form (`DD.MM.YYYY`). Built once per dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeRequest {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub headless: bool,
    pub loading_date_from: Option<String>,
    pub loading_date_to: Option<String>,
    pub unloading_date_from: Option<String>,
    pub unloading_date_to: Option<String>,
}

/// Backend acknowledgement for a scrape submission. Only confirms the
/// automation task was accepted, never that results exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScrapeAck {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
}

impl ScrapeAck {
    /// The backend answered but explicitly refused the task.
    pub fn is_rejected(&self) -> bool {
        self.success == Some(false) || self.status.as_deref() == Some("failed")
    }
}

/// Acknowledgement for an automation session launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// --- Truck registry / GPS ---

/// Live location returned by the GPS provider.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VehicleLocation {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lon")]
    pub lng: Option<f64>,
}

/// Truck record from the registry, reduced to the fields location
/// resolution reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Truck {
    pub id: i64,
    #[serde(default, alias = "licensePlate")]
    pub license_plate: Option<String>,
    #[serde(default, alias = "gpsVehicleCode")]
    pub gps_vehicle_code: Option<String>,
    #[serde(default, alias = "lastKnownLocation")]
    pub last_known_location: Option<String>,
    #[serde(default, alias = "gpsUpdatedAt", deserialize_with = "de_opt_datetime")]
    pub gps_updated_at: Option<DateTime<Utc>>,
}

impl From<Truck> for VehicleLocationState {
    fn from(truck: Truck) -> Self {
        Self {
            vehicle_id: truck.id,
            vehicle_gps_code: truck.gps_vehicle_code,
            last_known_address: truck.last_known_location,
            last_updated_at: truck.gps_updated_at,
        }
    }
}

// --- Freight offers ---

/// A freight offer as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freight {
    pub id: i64,
    #[serde(default, alias = "externalId")]
    pub trans_id: Option<String>,
    #[serde(default, alias = "loadingPlace")]
    pub loading_place: Option<String>,
    #[serde(default, alias = "unloadingPlace")]
    pub unloading_place: Option<String>,
    #[serde(default, alias = "dateLoading")]
    pub loading_date: Option<String>,
    #[serde(default, alias = "price")]
    pub price_original: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "createdAt", deserialize_with = "de_opt_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Pagination and filter passthrough for freight listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreightQuery {
    pub skip: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl FreightQuery {
    pub fn first_page(limit: u32) -> Self {
        Self {
            skip: 0,
            limit,
            origin: None,
            destination: None,
        }
    }

    /// Narrow the listing to a route. Blank values are left out.
    pub fn with_route(mut self, origin: Option<&str>, destination: Option<&str>) -> Self {
        self.origin = non_blank(origin).map(String::from);
        self.destination = non_blank(destination).map(String::from);
        self
    }
}

/// Count plus newest offer timestamp; used to tell whether a re-fetch saw
/// new results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreightSnapshot {
    pub count: usize,
    pub newest: Option<DateTime<Utc>>,
}

impl FreightSnapshot {
    pub fn of(freights: &[Freight]) -> Self {
        Self {
            count: freights.len(),
            newest: freights.iter().filter_map(|f| f.created_at).max(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts RFC 3339 timestamps and the backend's naive ISO timestamps
/// (interpreted as UTC).
fn de_opt_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|ndt| Some(ndt.and_utc()))
        .map_err(serde::de::Error::custom)
}
