/// Database row types. These map directly to SQLite rows and stay distinct
/// from the pereval-types API contracts to keep the DB layer independent.
use pereval_types::models::PassStatus;

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub phone: String,
    pub fam: String,
    pub name: String,
    pub otc: Option<String>,
}

/// A pass joined with its coordinates and submitter.
pub struct PerevalRow {
    pub id: i64,
    pub date_added: String,
    pub status: PassStatus,
    pub beauty_title: Option<String>,
    pub title: String,
    pub other_titles: Option<String>,
    pub connect: Option<String>,
    pub add_time: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub height: i64,
    pub email: String,
    pub phone: String,
    pub fam: String,
    pub name: String,
    pub otc: Option<String>,
}

pub struct ImageRow {
    pub id: i64,
    pub pereval_id: i64,
    pub img: Vec<u8>,
    pub title: String,
}

pub struct PerevalSummaryRow {
    pub id: i64,
    pub beauty_title: Option<String>,
    pub title: String,
    pub status: PassStatus,
}

/// Decoded image ready for insertion.
pub struct NewImage {
    pub data: Vec<u8>,
    pub title: String,
}

/// Result of an edit attempt on a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    NotEditable(PassStatus),
}

/// Result of a user insert or update.
pub enum UserWrite {
    Written(UserRow),
    NotFound,
    EmailTaken,
}
