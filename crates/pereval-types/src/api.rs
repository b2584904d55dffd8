use std::borrow::Cow;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

use crate::models::PassStatus;

/// Wire format of `add_time`.
pub const ADD_TIME_FORMAT: &str = "%H:%M:%S";

// -- Shared payload pieces --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CoordsPayload {
    #[validate(range(exclusive_min = -90.0, exclusive_max = 90.0))]
    pub latitude: f64,
    #[validate(range(exclusive_min = -180.0, exclusive_max = 180.0))]
    pub longitude: f64,
    pub height: i64,
}

/// Contact data of the person submitting a pass. Also the body of `POST /users/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UserPayload {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 80))]
    pub fam: String,
    #[validate(length(min = 1, max = 80))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 80))]
    pub otc: Option<String>,
}

/// An image as it travels over the wire: `img` is base64 of the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ImagePayload {
    pub img: String,
    #[validate(length(max = 255))]
    pub title: String,
}

// -- Passes --

/// Body of `POST /submitData` and `PATCH /submitData/{id}`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SubmitPerevalRequest {
    #[serde(default)]
    #[validate(length(max = 255))]
    pub beauty_title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub other_titles: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub connect: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_add_time"))]
    pub add_time: Option<String>,
    #[validate(nested)]
    pub coords: CoordsPayload,
    #[validate(nested)]
    pub user: UserPayload,
    #[validate(nested)]
    pub images: Vec<ImagePayload>,
}

impl SubmitPerevalRequest {
    /// `add_time` re-rendered as zero-padded `HH:MM:SS`. `None` when absent or
    /// unparseable; callers validate first.
    pub fn normalized_add_time(&self) -> Option<String> {
        self.add_time
            .as_deref()
            .and_then(|t| NaiveTime::parse_from_str(t, ADD_TIME_FORMAT).ok())
            .map(|t| t.format(ADD_TIME_FORMAT).to_string())
    }
}

fn validate_add_time(value: &str) -> Result<(), ValidationError> {
    NaiveTime::parse_from_str(value, ADD_TIME_FORMAT)
        .map(|_| ())
        .map_err(|_| {
            let mut err = ValidationError::new("add_time");
            err.message = Some(Cow::Borrowed("Invalid time format, expected HH:MM:SS"));
            err
        })
}

/// Envelope returned by `POST /submitData`, for success and failure alike.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: u16,
    pub message: String,
    pub id: Option<i64>,
}

/// Envelope returned by `PATCH /submitData/{id}`: `state` is 1 on success, 0 otherwise.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub state: u8,
    pub message: String,
}

/// Denormalized view of a pass with its coordinates, submitter and images.
#[derive(Debug, Serialize, Deserialize)]
pub struct PerevalResponse {
    pub id: i64,
    pub date_added: Option<NaiveDateTime>,
    pub status: PassStatus,
    pub beauty_title: Option<String>,
    pub title: String,
    pub other_titles: Option<String>,
    pub connect: Option<String>,
    pub add_time: Option<String>,
    pub coords: CoordsPayload,
    pub user: UserPayload,
    pub images: Vec<ImagePayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PerevalSummary {
    pub id: i64,
    pub beauty_title: Option<String>,
    pub title: String,
    pub status: PassStatus,
}

#[derive(Debug, Deserialize)]
pub struct PerevalListQuery {
    #[serde(rename = "user__email")]
    pub user_email: String,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub phone: String,
    pub fam: String,
    pub name: String,
    pub otc: Option<String>,
}

/// Partial user update; absent fields are left untouched. `otc` may be set
/// to `null` explicitly to clear it.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_otc_update"))]
pub struct UserUpdateRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 5, max = 20))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub fam: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub otc: Option<Option<String>>,
}

/// Keeps `"field": null` apart from an absent field: the former becomes
/// `Some(None)`, the latter stays `None` through `#[serde(default)]`.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn validate_otc_update(update: &UserUpdateRequest) -> Result<(), ValidationError> {
    match &update.otc {
        Some(Some(otc)) if otc.chars().count() > 80 => {
            let mut err = ValidationError::new("otc");
            err.message = Some(Cow::Borrowed("otc must be at most 80 characters"));
            Err(err)
        }
        _ => Ok(()),
    }
}

impl UserUpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone.is_none()
            && self.fam.is_none()
            && self.name.is_none()
            && self.otc.is_none()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserListQuery {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission() -> serde_json::Value {
        json!({
            "beauty_title": "пер.",
            "title": "Пхия",
            "add_time": "12:34:56",
            "coords": { "latitude": 45.3842, "longitude": 7.1525, "height": 1200 },
            "user": {
                "email": "qwerty@mail.ru",
                "phone": "+79031234567",
                "fam": "Пупкин",
                "name": "Василий",
                "otc": "Иванович"
            },
            "images": [{ "img": "aGVsbG8=", "title": "Седловина" }]
        })
    }

    fn parse(value: serde_json::Value) -> SubmitPerevalRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn valid_submission_passes() {
        let req = parse(submission());
        assert!(req.validate().is_ok());
        assert!(req.other_titles.is_none());
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        let mut body = submission();
        body["coords"]["latitude"] = json!(100);
        let errors = parse(body).validate().unwrap_err();
        assert!(errors.errors().contains_key("coords"));
        assert!(!errors.errors().contains_key("user"));
    }

    #[test]
    fn longitude_bound_is_exclusive() {
        let mut body = submission();
        body["coords"]["longitude"] = json!(180.0);
        assert!(parse(body).validate().is_err());
    }

    #[test]
    fn malformed_time_is_rejected() {
        let mut body = submission();
        body["add_time"] = json!("25:00");
        assert!(parse(body).validate().is_err());
    }

    #[test]
    fn add_time_is_normalized() {
        let mut body = submission();
        body["add_time"] = json!("7:05:09");
        let req = parse(body);
        assert!(req.validate().is_ok());
        assert_eq!(req.normalized_add_time().as_deref(), Some("07:05:09"));
    }

    #[test]
    fn bad_email_is_rejected() {
        let mut body = submission();
        body["user"]["email"] = json!("not-an-address");
        assert!(parse(body).validate().is_err());
    }

    #[test]
    fn unknown_fields_are_refused() {
        let mut body = submission();
        body["status"] = json!("accepted");
        assert!(serde_json::from_value::<SubmitPerevalRequest>(body).is_err());
    }

    #[test]
    fn empty_user_update_detected() {
        assert!(UserUpdateRequest::default().is_empty());
        let update: UserUpdateRequest = serde_json::from_value(json!({ "phone": "+7999123" })).unwrap();
        assert!(!update.is_empty());
        assert!(update.validate().is_ok());
    }

    #[test]
    fn explicit_null_otc_counts_as_a_change() {
        let update: UserUpdateRequest = serde_json::from_value(json!({ "otc": null })).unwrap();
        assert_eq!(update.otc, Some(None));
        assert!(!update.is_empty());
        assert!(update.validate().is_ok());

        let update: UserUpdateRequest = serde_json::from_value(json!({ "name": "Пётр" })).unwrap();
        assert_eq!(update.otc, None);

        let long = "о".repeat(81);
        let update: UserUpdateRequest = serde_json::from_value(json!({ "otc": long })).unwrap();
        assert!(update.validate().is_err());
    }

    #[test]
    fn list_limit_is_bounded() {
        let q: UserListQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!((q.limit, q.offset), (10, 0));
        let q: UserListQuery = serde_json::from_value(json!({ "limit": 101 })).unwrap();
        assert!(q.validate().is_err());
    }
}
