use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A single safety report filed against a station
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub incident_type: IncidentType,
    pub timestamp: DateTime<Utc>,
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl IncidentEvent {
    pub fn new(
        incident_type: IncidentType,
        timestamp: DateTime<Utc>,
        station: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_type,
            timestamp,
            station: station.into(),
            latitude,
            longitude,
        }
    }
}

/// Closed set of reportable incident types.
///
/// Reports coming from the public form carry the Spanish labels, which are
/// accepted as aliases when parsing.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum IncidentType {
    #[serde(alias = "Hurto")]
    #[strum(to_string = "theft", serialize = "Hurto")]
    Theft,
    #[serde(alias = "Hurto a mano armada")]
    #[strum(to_string = "armed_theft", serialize = "Hurto a mano armada")]
    ArmedTheft,
    #[serde(alias = "Cosquilleo")]
    #[strum(to_string = "pickpocketing", serialize = "Cosquilleo")]
    Pickpocketing,
    #[serde(alias = "Ataque")]
    #[strum(to_string = "assault", serialize = "Ataque")]
    Assault,
    #[serde(alias = "Apertura de puertas")]
    #[strum(to_string = "door_forcing", serialize = "Apertura de puertas")]
    DoorForcing,
    #[serde(alias = "Sospechoso")]
    #[strum(to_string = "suspicious_activity", serialize = "Sospechoso")]
    SuspiciousActivity,
    #[serde(alias = "Acoso")]
    #[strum(to_string = "harassment", serialize = "Acoso")]
    Harassment,
}

impl IncidentType {
    pub const COUNT: usize = 7;

    /// All types in encoding order
    pub const ALL: [IncidentType; IncidentType::COUNT] = [
        IncidentType::Theft,
        IncidentType::ArmedTheft,
        IncidentType::Pickpocketing,
        IncidentType::Assault,
        IncidentType::DoorForcing,
        IncidentType::SuspiciousActivity,
        IncidentType::Harassment,
    ];

    /// Stable integer encoding used in feature records
    pub fn index(&self) -> usize {
        match self {
            IncidentType::Theft => 0,
            IncidentType::ArmedTheft => 1,
            IncidentType::Pickpocketing => 2,
            IncidentType::Assault => 3,
            IncidentType::DoorForcing => 4,
            IncidentType::SuspiciousActivity => 5,
            IncidentType::Harassment => 6,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Aggregate view of a station derived from its incident history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationProfile {
    pub station: String,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub historical_incident_count: usize,
}

impl StationProfile {
    /// A station with too little history to fill a single window
    pub fn is_cold_start(&self, sequence_length: usize) -> bool {
        self.historical_incident_count < sequence_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_index_round_trip() {
        for (i, t) in IncidentType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
            assert_eq!(IncidentType::from_index(i), Some(*t));
        }
        assert_eq!(IncidentType::from_index(7), None);
    }

    #[test]
    fn test_parse_spanish_labels() {
        assert_eq!(IncidentType::from_str("Hurto").unwrap(), IncidentType::Theft);
        assert_eq!(
            IncidentType::from_str("Hurto a mano armada").unwrap(),
            IncidentType::ArmedTheft
        );
        assert_eq!(
            IncidentType::from_str("pickpocketing").unwrap(),
            IncidentType::Pickpocketing
        );
        assert!(IncidentType::from_str("vandalism").is_err());
    }

    #[test]
    fn test_serde_accepts_alias() {
        let parsed: IncidentType = serde_json::from_str("\"Acoso\"").unwrap();
        assert_eq!(parsed, IncidentType::Harassment);
        assert_eq!(
            serde_json::to_string(&IncidentType::DoorForcing).unwrap(),
            "\"door_forcing\""
        );
        assert_eq!(IncidentType::SuspiciousActivity.to_string(), "suspicious_activity");
    }

    #[test]
    fn test_event_id_defaults_when_missing() {
        let event: IncidentEvent = serde_json::from_str(
            r#"{"incident_type":"Cosquilleo","timestamp":"2024-03-04T08:15:00Z","station":"Calle 72","latitude":4.6583,"longitude":-74.0652}"#,
        )
        .unwrap();
        assert_eq!(event.incident_type, IncidentType::Pickpocketing);
        assert_eq!(event.station, "Calle 72");
    }
}
