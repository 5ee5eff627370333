// src/validation.rs

use std::borrow::Cow;
use std::ops::Deref;

use actix_web::{dev::Payload, error, web, FromRequest, HttpRequest};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::LocalBoxFuture;
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{CrmError, ValidationIssue};

/// Key validator uses for struct-level (`schema`) failures.
const STRUCT_LEVEL: &str = "__all__";

/// Rejects empty and whitespace-only text.
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(rule("required", "Required"))
    } else {
        Ok(())
    }
}

/// An error whose code names the field it belongs to. Struct-level rules use
/// this so the response can still point at a concrete path.
pub fn rule(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Flattens validator's per-field errors into `{path, message}` issues,
/// ordered by path.
pub fn issues_from(errors: &ValidationErrors) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| {
                let path = if field == STRUCT_LEVEL {
                    err.code.to_string()
                } else {
                    camel_case(&field)
                };
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                ValidationIssue::new(path, message)
            })
        })
        .collect();
    issues.sort_by(|a, b| a.path.cmp(&b.path));
    issues
}

impl From<ValidationErrors> for CrmError {
    fn from(errors: ValidationErrors) -> Self {
        CrmError::Validation(issues_from(&errors))
    }
}

/// JSON body that has been deserialized and passed [`Validate`].
pub struct Valid<T>(pub T);

impl<T> Valid<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Valid<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> FromRequest for Valid<T>
where
    T: DeserializeOwned + Validate + 'static,
{
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let body = web::Json::<T>::from_request(req, payload);
        Box::pin(async move {
            let body = body.await?.into_inner();
            body.validate().map_err(CrmError::from)?;
            Ok(Valid(body))
        })
    }
}

/// Malformed JSON (wrong types, unknown enum values) becomes a 400 issue list.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let issue = match &err {
            error::JsonPayloadError::Deserialize(e) => ValidationIssue::new("body", e.to_string()),
            other => ValidationIssue::new("body", other.to_string()),
        };
        CrmError::Validation(vec![issue]).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        CrmError::invalid("query", err.to_string()).into()
    })
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
}

/// Optional timestamp given as RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
/// Blank strings read as absent.
pub fn flexible_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_date(text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid date '{}'", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        phone: Option<Option<String>>,
    }

    #[derive(Validate)]
    struct Signup {
        #[validate(custom(function = "not_blank"))]
        first_name: String,
        #[validate(email(message = "Invalid email"))]
        email: Option<String>,
        #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
        latitude: Option<f64>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Due {
        #[serde(default, deserialize_with = "flexible_date")]
        due_date: Option<DateTime<Utc>>,
    }

    #[test]
    fn double_option_separates_null_from_missing() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.phone, None);

        let cleared: Patch = serde_json::from_str(r#"{"phone": null}"#).unwrap();
        assert_eq!(cleared.phone, Some(None));

        let set: Patch = serde_json::from_str(r#"{"phone": "555-0101"}"#).unwrap();
        assert_eq!(set.phone, Some(Some("555-0101".to_string())));
    }

    #[test]
    fn every_failing_field_is_reported_under_its_wire_name() {
        let input = Signup {
            first_name: "  ".into(),
            email: Some("not-an-email".into()),
            latitude: Some(123.0),
        };
        let issues = issues_from(&input.validate().unwrap_err());
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, ["email", "firstName", "latitude"]);
        assert_eq!(issues[1].message, "Required");
        assert_eq!(issues[2].message, "Latitude must be between -90 and 90");
    }

    #[test]
    fn clean_input_passes() {
        let input = Signup {
            first_name: "Ada".into(),
            email: Some("ada@example.com".into()),
            latitude: None,
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn struct_level_rules_keep_their_field_path() {
        let mut errors = ValidationErrors::new();
        errors.add(STRUCT_LEVEL, rule("photoUrl", "A photo is required"));
        let issues = issues_from(&errors);
        assert_eq!(issues, vec![ValidationIssue::new("photoUrl", "A photo is required")]);
    }

    #[test]
    fn dates_accept_timestamps_and_plain_days() {
        let day: Due = serde_json::from_str(r#"{"dueDate": "2024-03-09"}"#).unwrap();
        assert_eq!(day.due_date.unwrap().to_rfc3339(), "2024-03-09T00:00:00+00:00");

        let stamp: Due = serde_json::from_str(r#"{"dueDate": "2024-03-09T15:30:00Z"}"#).unwrap();
        assert_eq!(stamp.due_date.unwrap().to_rfc3339(), "2024-03-09T15:30:00+00:00");

        let blank: Due = serde_json::from_str(r#"{"dueDate": ""}"#).unwrap();
        assert!(blank.due_date.is_none());
        assert!(serde_json::from_str::<Due>(r#"{"dueDate": "soon"}"#).is_err());
    }
}
