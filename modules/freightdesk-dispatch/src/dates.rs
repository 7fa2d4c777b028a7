//! Date conversion between the dashboard and the freight marketplace.
//!
//! The dashboard's date inputs produce ISO dates (`YYYY-MM-DD`); the
//! marketplace search form expects `DD.MM.YYYY`.

use chrono::NaiveDate;

use freightdesk_common::{FreightDeskError, SearchFilter};

const DASHBOARD_FORMAT: &str = "%Y-%m-%d";
const MARKETPLACE_FORMAT: &str = "%d.%m.%Y";

/// Convert one dashboard date to the marketplace form.
///
/// Absent or blank input yields `Ok(None)`. Anything that is not a real
/// calendar date in `YYYY-MM-DD` form is a validation error.
pub fn to_marketplace_date(value: Option<&str>) -> Result<Option<String>, FreightDeskError> {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    // chrono accepts unpadded fields, the dashboard never sends them
    if raw.len() != 10 {
        return Err(malformed(raw));
    }

    NaiveDate::parse_from_str(raw, DASHBOARD_FORMAT)
        .map(|date| Some(date.format(MARKETPLACE_FORMAT).to_string()))
        .map_err(|_| malformed(raw))
}

fn malformed(raw: &str) -> FreightDeskError {
    FreightDeskError::Validation(format!("'{raw}' is not a valid date (expected YYYY-MM-DD)"))
}

/// The four filter dates, already in marketplace form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketplaceDates {
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub unloading_from: Option<String>,
    pub unloading_to: Option<String>,
}

impl MarketplaceDates {
    /// Normalize every date of a filter. The first bad field fails the
    /// whole filter, with the field named in the message.
    pub fn from_filter(filter: &SearchFilter) -> Result<Self, FreightDeskError> {
        Ok(Self {
            loading_from: field("loading date from", &filter.loading_date_from)?,
            loading_to: field("loading date to", &filter.loading_date_to)?,
            unloading_from: field("unloading date from", &filter.unloading_date_from)?,
            unloading_to: field("unloading date to", &filter.unloading_date_to)?,
        })
    }
}

fn field(name: &str, value: &Option<String>) -> Result<Option<String>, FreightDeskError> {
    to_marketplace_date(value.as_deref()).map_err(|e| match e {
        FreightDeskError::Validation(msg) => FreightDeskError::Validation(format!("{name}: {msg}")),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn converts_iso_to_marketplace_form() {
        assert_eq!(
            to_marketplace_date(Some("2024-03-01")).unwrap().as_deref(),
            Some("01.03.2024")
        );
    }

    #[test]
    fn absent_and_blank_are_none() {
        assert_eq!(to_marketplace_date(None).unwrap(), None);
        assert_eq!(to_marketplace_date(Some("  ")).unwrap(), None);
    }

    #[test]
    fn wrong_segment_count_is_rejected() {
        for bad in ["2024-03", "2024-03-01-05", "01.03.2024", "20240301"] {
            let err = to_marketplace_date(Some(bad)).unwrap_err();
            assert!(matches!(err, FreightDeskError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn impossible_calendar_dates_are_rejected() {
        assert!(to_marketplace_date(Some("2024-02-30")).is_err());
        assert!(to_marketplace_date(Some("2023-13-01")).is_err());
        assert!(to_marketplace_date(Some("2024-2-1")).is_err());
    }

    #[test]
    fn components_survive_conversion() {
        let mut day = NaiveDate::from_ymd_opt(2023, 12, 25).unwrap();
        for _ in 0..800 {
            let iso = day.format("%Y-%m-%d").to_string();
            let converted = to_marketplace_date(Some(&iso)).unwrap().unwrap();
            let back = NaiveDate::parse_from_str(&converted, "%d.%m.%Y").unwrap();
            assert_eq!(back, day);
            assert_eq!(
                converted,
                format!("{:02}.{:02}.{}", day.day(), day.month(), day.year())
            );
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn filter_error_names_the_field() {
        let filter = SearchFilter {
            loading_date_from: Some("2024-03-01".to_string()),
            unloading_date_to: Some("soon".to_string()),
            ..Default::default()
        };
        match MarketplaceDates::from_filter(&filter).unwrap_err() {
            FreightDeskError::Validation(msg) => assert!(msg.starts_with("unloading date to")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
