use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Rejections raised before a submission reaches the classifier.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("unrecognized {field}: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("please enter a valid email address")]
    InvalidEmail,

    #[error("password must be at least {0} characters")]
    WeakPassword(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn label(self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(ValidationError::UnknownValue {
                field: "gender",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    pub fn label(self) -> &'static str {
        match self {
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal",
            BmiCategory::Overweight => "Overweight",
            BmiCategory::Obese => "Obese",
        }
    }

    /// Representative BMI value used as the numeric feature for a category.
    pub fn index(self) -> f64 {
        match self {
            BmiCategory::Underweight => 20.0,
            BmiCategory::Normal => 23.0,
            BmiCategory::Overweight => 27.0,
            BmiCategory::Obese => 32.0,
        }
    }

    pub fn is_elevated(self) -> bool {
        matches!(self, BmiCategory::Overweight | BmiCategory::Obese)
    }

    /// Case-insensitive lookup; `None` for anything outside the four categories.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "underweight" => Some(BmiCategory::Underweight),
            "normal" => Some(BmiCategory::Normal),
            "overweight" => Some(BmiCategory::Overweight),
            "obese" => Some(BmiCategory::Obese),
            _ => None,
        }
    }
}

impl fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BmiCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BmiCategory::parse_lenient(s).ok_or_else(|| ValidationError::UnknownValue {
            field: "bmi_category",
            value: s.to_string(),
        })
    }
}

/// One patient submission, as entered on the survey form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyInput {
    pub phone: String,
    pub age: i32,
    pub gender: Gender,
    #[serde(default)]
    pub occupation: String,
    pub stress: i32,
    /// Systolic blood pressure in mmHg.
    pub blood_pressure: f64,
    pub heart_rate: i32,
    /// Hours of sleep per night.
    pub sleep_duration: f64,
    pub bmi_category: BmiCategory,
    /// Snoring episodes per week.
    pub snoring_frequency: i32,
    /// Working hours per day.
    pub working_hours: i32,
}

impl SurveyInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.phone.trim().is_empty() {
            return Err(ValidationError::Missing { field: "phone" });
        }
        check_range("age", f64::from(self.age), 0.0, 120.0)?;
        check_range("stress", f64::from(self.stress), 0.0, 10.0)?;
        check_range("blood_pressure", self.blood_pressure, 70.0, 220.0)?;
        check_range("heart_rate", f64::from(self.heart_rate), 40.0, 200.0)?;
        check_range("sleep_duration", self.sleep_duration, 0.0, 24.0)?;
        check_range(
            "snoring_frequency",
            f64::from(self.snoring_frequency),
            0.0,
            21.0,
        )?;
        check_range("working_hours", f64::from(self.working_hours), 0.0, 24.0)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    // NaN fails both comparisons, so it is rejected too.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

/// A classified submission that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDraft {
    pub id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub user_email: String,
    pub survey: SurveyInput,
    pub diagnosis: String,
    pub severity: u8,
}

impl AnalysisDraft {
    pub fn new(
        user_email: impl Into<String>,
        survey: SurveyInput,
        diagnosis: impl Into<String>,
        severity: u8,
    ) -> Self {
        Self {
            id: None,
            created_at: None,
            user_email: user_email.into(),
            survey,
            diagnosis: diagnosis.into(),
            severity,
        }
    }

    /// Fills in whichever of id / created_at is still missing.
    pub fn into_record(self, now: DateTime<Utc>) -> AnalysisRecord {
        AnalysisRecord {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            created_at: self.created_at.unwrap_or(now),
            user_email: self.user_email,
            survey: self.survey,
            diagnosis: self.diagnosis,
            severity: self.severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    pub user_email: String,
    #[serde(flatten)]
    pub survey: SurveyInput,
    pub diagnosis: String,
    pub severity: u8,
}

/// Parses RFC 3339, or a naive ISO 8601 timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(stamped) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamped.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisSummary {
    pub diagnosis: String,
    pub count: usize,
    pub avg_severity: f64,
}

#[cfg(test)]
pub(crate) fn sample_survey() -> SurveyInput {
    SurveyInput {
        phone: "5550101".to_string(),
        age: 42,
        gender: Gender::Female,
        occupation: "Nurse".to_string(),
        stress: 3,
        blood_pressure: 118.0,
        heart_rate: 68,
        sleep_duration: 8.0,
        bmi_category: BmiCategory::Normal,
        snoring_frequency: 1,
        working_hours: 8,
    }
}
