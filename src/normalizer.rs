//! Feature normalization
//!
//! Maps a survey, typed or loosely shaped, onto the numeric feature vector the
//! classifier scores. Normalization never fails: a missing or malformed field
//! takes its documented default instead.

use serde_json::{Map, Value};

use crate::models::{BmiCategory, SurveyInput};

pub const DEFAULT_AGE: f64 = 0.0;
pub const DEFAULT_STRESS: f64 = 0.0;
pub const DEFAULT_SYSTOLIC_BP: f64 = 120.0;
pub const DEFAULT_HEART_RATE: f64 = 75.0;
pub const DEFAULT_SLEEP_HOURS: f64 = 7.0;
pub const DEFAULT_BMI_CATEGORY: BmiCategory = BmiCategory::Normal;
pub const DEFAULT_SNORING: f64 = 0.0;
pub const DEFAULT_WORKING_HOURS: f64 = 8.0;

/// Canonical numeric view of a survey.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSet {
    pub age: f64,
    pub stress: f64,
    pub systolic_bp: f64,
    pub heart_rate: f64,
    pub sleep_hours: f64,
    pub bmi_category: BmiCategory,
    pub bmi_index: f64,
    pub snoring_per_week: f64,
    pub working_hours: f64,
}

impl From<&SurveyInput> for FeatureSet {
    fn from(input: &SurveyInput) -> Self {
        FeatureSet {
            age: f64::from(input.age),
            stress: f64::from(input.stress),
            systolic_bp: finite_or(input.blood_pressure, DEFAULT_SYSTOLIC_BP),
            heart_rate: f64::from(input.heart_rate),
            sleep_hours: finite_or(input.sleep_duration, DEFAULT_SLEEP_HOURS),
            bmi_category: input.bmi_category,
            bmi_index: input.bmi_category.index(),
            snoring_per_week: f64::from(input.snoring_frequency),
            working_hours: f64::from(input.working_hours),
        }
    }
}

/// A survey as it arrives from an untrusted source (JSON upload, form post).
#[derive(Debug, Clone, Default)]
pub struct RawSurvey {
    fields: Map<String, Value>,
}

impl RawSurvey {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(text).map(Self::from_json)
    }

    fn number(&self, key: &str) -> Option<f64> {
        let value = match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// Integer-valued fields are truncated toward zero.
    fn integer(&self, key: &str, default: f64) -> f64 {
        self.number(key).map(f64::trunc).unwrap_or(default)
    }

    fn real(&self, key: &str, default: f64) -> f64 {
        self.number(key).unwrap_or(default)
    }

    fn bmi_category(&self) -> BmiCategory {
        match self.fields.get("bmi_category") {
            Some(Value::String(s)) => BmiCategory::parse_lenient(s).unwrap_or(DEFAULT_BMI_CATEGORY),
            _ => DEFAULT_BMI_CATEGORY,
        }
    }
}

impl From<&SurveyInput> for RawSurvey {
    fn from(input: &SurveyInput) -> Self {
        match serde_json::to_value(input) {
            Ok(value) => RawSurvey::from_json(value),
            Err(_) => RawSurvey::default(),
        }
    }
}

pub fn normalize(raw: &RawSurvey) -> FeatureSet {
    let bmi_category = raw.bmi_category();
    FeatureSet {
        age: raw.integer("age", DEFAULT_AGE),
        stress: raw.integer("stress", DEFAULT_STRESS),
        systolic_bp: raw.real("blood_pressure", DEFAULT_SYSTOLIC_BP),
        heart_rate: raw.integer("heart_rate", DEFAULT_HEART_RATE),
        sleep_hours: raw.real("sleep_duration", DEFAULT_SLEEP_HOURS),
        bmi_category,
        bmi_index: bmi_category.index(),
        snoring_per_week: raw.integer("snoring_frequency", DEFAULT_SNORING),
        working_hours: raw.integer("working_hours", DEFAULT_WORKING_HOURS),
    }
}

fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        default
    }
}
