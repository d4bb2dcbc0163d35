use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a record kind is charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartShape {
    /// Every record counts once (harm reduction, referrals).
    Single,
    /// Records carry a `type` and a `number_of_clients` (meals, special events).
    Grouped,
    /// Like grouped, but `number_of_clients` follows a participant join table.
    Bridge,
}

/// Every kind of record the service keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Meal,
    SpecialEvent,
    CoreActivity,
    ProjectActivity,
    HarmReduction,
    Referral,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Meal,
        RecordKind::SpecialEvent,
        RecordKind::CoreActivity,
        RecordKind::ProjectActivity,
        RecordKind::HarmReduction,
        RecordKind::Referral,
    ];

    /// URL path segment.
    pub fn slug(&self) -> &'static str {
        match self {
            RecordKind::Meal => "meal",
            RecordKind::SpecialEvent => "special-event",
            RecordKind::CoreActivity => "core-activity",
            RecordKind::ProjectActivity => "project-activity",
            RecordKind::HarmReduction => "harm-reduction",
            RecordKind::Referral => "referral",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Meal => "meal",
            RecordKind::SpecialEvent => "special_event",
            RecordKind::CoreActivity => "core_activity",
            RecordKind::ProjectActivity => "project_activity",
            RecordKind::HarmReduction => "harm_reduction",
            RecordKind::Referral => "referral",
        }
    }

    /// Join table holding participants, for bridge kinds.
    pub fn participant_table(&self) -> Option<&'static str> {
        match self {
            RecordKind::CoreActivity => Some("core_activity_participants"),
            RecordKind::ProjectActivity => Some("project_activity_participants"),
            _ => None,
        }
    }

    /// Human-readable name used in response messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            RecordKind::Meal => "Meal",
            RecordKind::SpecialEvent => "Special Event",
            RecordKind::CoreActivity => "Core Activity",
            RecordKind::ProjectActivity => "Project Activity",
            RecordKind::HarmReduction => "Harm Reduction",
            RecordKind::Referral => "Referral",
        }
    }

    pub fn shape(&self) -> ChartShape {
        match self {
            RecordKind::Meal | RecordKind::SpecialEvent => ChartShape::Grouped,
            RecordKind::CoreActivity | RecordKind::ProjectActivity => ChartShape::Bridge,
            RecordKind::HarmReduction | RecordKind::Referral => ChartShape::Single,
        }
    }

    pub fn is_typed(&self) -> bool {
        self.shape() != ChartShape::Single
    }

    /// Kinds planned ahead of time, which expose an `/upcoming` listing.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            RecordKind::SpecialEvent | RecordKind::CoreActivity | RecordKind::ProjectActivity
        )
    }

    /// Accepted `type` values. Empty for single kinds.
    pub fn allowed_types(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Meal => &["Breakfast", "Lunch", "Snack", "Takeout"],
            RecordKind::SpecialEvent => &["Thanksgiving", "Good Friday", "Christmas"],
            RecordKind::CoreActivity => &[
                "Summer Camp",
                "March Break",
                "EarlyON",
                "Spanish Program",
                "Homework Club",
                "Youth drop-in",
                "Girlfriends club",
                "Ready to rebound",
                "Soccer club",
            ],
            RecordKind::ProjectActivity => &["Workshop", "Project", "Other", "Evening Program"],
            RecordKind::HarmReduction | RecordKind::Referral => &[],
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Stored record, shared by every kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub date: NaiveDate,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub entry_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub number_of_clients: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

/// Create payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryInput {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub number_of_clients: Option<i64>,
    pub date: Option<String>,
    pub description: Option<String>,
}

/// Validated create payload.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub date: NaiveDate,
    pub entry_type: Option<String>,
    pub number_of_clients: Option<i64>,
    pub description: Option<String>,
}

/// Validated update payload; `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub date: Option<NaiveDate>,
    pub entry_type: Option<String>,
    pub number_of_clients: Option<i64>,
    pub description: Option<String>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.entry_type.is_none()
            && self.number_of_clients.is_none()
            && self.description.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub activity_id: String,
    pub client_id: String,
    pub date_registered: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsInput {
    pub client_ids: Vec<String>,
    pub date_registered: Option<String>,
}

/// One page of a listing plus the total row count.
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub count: i64,
}

/// API Response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }
}

/// `?period=&date=` on chart endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub period: Option<String>,
    pub date: Option<String>,
}

/// `?page=&page_size=` on listings
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct YearQuery {
    pub year: Option<String>,
}

/// One chart.js style dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,
    pub data: Vec<i64>,
}

/// Chart payload returned by every `/chart` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartData {
    pub from: String,
    pub to: String,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualClientCount {
    pub year: i32,
    pub total_clients: i64,
    pub unique_clients: i64,
}
