use std::fmt;

use crate::models::SurveyInput;
use crate::normalizer::FeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diagnosis {
    ObstructiveSleepApnea,
    ChronicInsomnia,
    SleepDeprivation,
    Normal,
    NeedsReview,
}

impl Diagnosis {
    pub const ALL: [Diagnosis; 5] = [
        Diagnosis::ObstructiveSleepApnea,
        Diagnosis::ChronicInsomnia,
        Diagnosis::SleepDeprivation,
        Diagnosis::Normal,
        Diagnosis::NeedsReview,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Diagnosis::ObstructiveSleepApnea => "High Risk: Possible Obstructive Sleep Apnea",
            Diagnosis::ChronicInsomnia => "High Risk: Chronic Insomnia",
            Diagnosis::SleepDeprivation => "Moderate Risk: Sleep Deprivation",
            Diagnosis::Normal => "Normal",
            Diagnosis::NeedsReview => "Needs Review",
        }
    }

    pub fn severity(self) -> u8 {
        match self {
            Diagnosis::ObstructiveSleepApnea | Diagnosis::ChronicInsomnia => 3,
            Diagnosis::SleepDeprivation => 2,
            Diagnosis::NeedsReview => 1,
            Diagnosis::Normal => 0,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.label() == label)
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskScores {
    pub apnea: u32,
    pub insomnia: u32,
    pub deprivation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub diagnosis: Diagnosis,
    pub severity: u8,
    pub scores: RiskScores,
    /// Human-readable list of the conditions that contributed to the scores.
    pub rationale: Vec<String>,
}

pub fn classify(input: &SurveyInput) -> Assessment {
    classify_features(&FeatureSet::from(input))
}

/// Scores the three disorder categories, then applies the decision rules in
/// priority order. The first matching rule wins.
pub fn classify_features(features: &FeatureSet) -> Assessment {
    let mut rationale = Vec::new();
    let scores = score_features(features, &mut rationale);

    let diagnosis = if scores.apnea >= 5 {
        Diagnosis::ObstructiveSleepApnea
    } else if scores.insomnia >= 4 {
        Diagnosis::ChronicInsomnia
    } else if scores.deprivation >= 3 {
        Diagnosis::SleepDeprivation
    } else if within_healthy_pattern(features) {
        Diagnosis::Normal
    } else if scores.deprivation >= 2 {
        Diagnosis::SleepDeprivation
    } else {
        Diagnosis::NeedsReview
    };

    Assessment {
        diagnosis,
        severity: diagnosis.severity(),
        scores,
        rationale,
    }
}

pub fn score_features(features: &FeatureSet, rationale: &mut Vec<String>) -> RiskScores {
    let mut scores = RiskScores::default();
    let mut add = |score: &mut u32, points: u32, reason: String| {
        *score += points;
        rationale.push(format!("{reason} (+{points})"));
    };

    if features.bmi_category.is_elevated() {
        add(
            &mut scores.apnea,
            2,
            format!("apnea: BMI category {}", features.bmi_category),
        );
    }
    if features.snoring_per_week >= 5.0 {
        add(
            &mut scores.apnea,
            2,
            format!("apnea: snoring {} times/week", features.snoring_per_week),
        );
    }
    if features.systolic_bp >= 140.0 {
        add(
            &mut scores.apnea,
            1,
            format!("apnea: systolic blood pressure {} mmHg", features.systolic_bp),
        );
    }
    if features.heart_rate >= 90.0 {
        add(
            &mut scores.apnea,
            1,
            format!("apnea: heart rate {} bpm", features.heart_rate),
        );
    }
    if features.sleep_hours <= 5.0 {
        add(
            &mut scores.apnea,
            1,
            format!("apnea: {} hours of sleep", features.sleep_hours),
        );
    }

    if features.sleep_hours <= 4.0 {
        add(
            &mut scores.insomnia,
            2,
            format!("insomnia: {} hours of sleep", features.sleep_hours),
        );
    }
    if features.stress >= 8.0 {
        add(
            &mut scores.insomnia,
            2,
            format!("insomnia: stress level {}/10", features.stress),
        );
    }
    if features.working_hours >= 10.0 {
        add(
            &mut scores.insomnia,
            1,
            format!("insomnia: {} working hours/day", features.working_hours),
        );
    }

    if features.sleep_hours < 6.0 {
        add(
            &mut scores.deprivation,
            2,
            format!("deprivation: {} hours of sleep", features.sleep_hours),
        );
    }
    if features.working_hours >= 9.0 {
        add(
            &mut scores.deprivation,
            1,
            format!("deprivation: {} working hours/day", features.working_hours),
        );
    }
    if features.stress >= 7.0 {
        add(
            &mut scores.deprivation,
            1,
            format!("deprivation: stress level {}/10", features.stress),
        );
    }

    scores
}

fn within_healthy_pattern(features: &FeatureSet) -> bool {
    (7.0..=9.0).contains(&features.sleep_hours)
        && features.stress <= 6.0
        && features.snoring_per_week <= 2.0
}

pub fn severity_label(severity: u8) -> &'static str {
    match severity {
        0 => "GREEN - No Risk",
        1 => "YELLOW - Low Risk / Needs Review",
        2 => "ORANGE - Moderate Risk",
        3 => "RED - High Risk / Urgent",
        _ => "Unknown",
    }
}

/// Triage tag shown next to each analysis in the admin listing.
pub fn urgency(severity: u8) -> &'static str {
    match severity {
        3.. => "URGENT",
        2 => "MODERATE",
        _ => "NORMAL",
    }
}

pub fn recommendation(severity: u8) -> &'static [&'static str] {
    match severity {
        0 => &[
            "Normal sleep pattern detected",
            "All vital signs within healthy ranges",
            "No indicators of sleep-related disorders",
            "RECOMMENDATION: Continue current sleep habits and regular monitoring",
        ],
        1 => &[
            "Mild abnormalities detected in sleep metrics",
            "Some vital signs show minor deviations",
            "Further monitoring recommended",
            "RECOMMENDATION: Consider lifestyle adjustments for better sleep quality",
        ],
        2 => &[
            "Moderate sleep disorder risk identified",
            "Multiple vital sign abnormalities detected",
            "Sleep deprivation or irregular patterns observed",
            "RECOMMENDATION: Medical consultation with sleep specialist recommended",
        ],
        3 => &[
            "High-risk sleep disorder detected",
            "Critical vital sign abnormalities present",
            "Urgent medical intervention may be needed",
            "RECOMMENDATION: Immediate healthcare professional consultation required",
        ],
        _ => &["Unable to determine classification details"],
    }
}
