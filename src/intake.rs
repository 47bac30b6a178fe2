use std::io::Read;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::normalize_email;
use crate::models::{AnalysisDraft, AnalysisRecord, BmiCategory, Gender, SurveyInput, ValidationError};
use crate::risk::{self, Assessment};
use crate::store::{AnalysisStore, StorageBackend, StoreError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Validates, classifies and stores one submission.
pub async fn submit<B: StorageBackend>(
    store: &AnalysisStore<B>,
    user_email: &str,
    survey: SurveyInput,
) -> Result<(AnalysisRecord, Assessment), IntakeError> {
    survey.validate()?;
    let assessment = risk::classify(&survey);
    let draft = AnalysisDraft::new(
        normalize_email(user_email),
        survey,
        assessment.diagnosis.label(),
        assessment.severity,
    );
    let record = store.save(draft).await?;
    info!(
        id = %record.id,
        diagnosis = %assessment.diagnosis,
        severity = assessment.severity,
        "analysis saved"
    );
    Ok((record, assessment))
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    user_email: String,
    phone: String,
    age: i32,
    gender: String,
    #[serde(default)]
    occupation: String,
    stress: i32,
    blood_pressure: f64,
    heart_rate: i32,
    sleep_duration: f64,
    bmi_category: String,
    snoring_frequency: i32,
    working_hours: i32,
}

impl CsvRow {
    fn into_survey(self) -> Result<(String, SurveyInput), ValidationError> {
        if self.user_email.trim().is_empty() {
            return Err(ValidationError::Missing { field: "user_email" });
        }
        let survey = SurveyInput {
            phone: self.phone,
            age: self.age,
            gender: self.gender.parse::<Gender>()?,
            occupation: self.occupation,
            stress: self.stress,
            blood_pressure: self.blood_pressure,
            heart_rate: self.heart_rate,
            sleep_duration: self.sleep_duration,
            bmi_category: self.bmi_category.parse::<BmiCategory>()?,
            snoring_frequency: self.snoring_frequency,
            working_hours: self.working_hours,
        };
        Ok((self.user_email, survey))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub rejected: usize,
}

/// Imports survey rows from CSV. Rows that fail to parse or validate are
/// logged and counted; they never abort the import.
pub async fn import_csv<B, R>(store: &AnalysisStore<B>, input: R) -> Result<ImportSummary, IntakeError>
where
    B: StorageBackend,
    R: Read,
{
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let parsed = match result {
            Ok(row) => row.into_survey().map_err(IntakeError::from),
            Err(err) => Err(IntakeError::from(err)),
        };
        let (email, survey) = match parsed {
            Ok(pair) => pair,
            Err(err) => {
                warn!(line, error = %err, "skipping CSV row");
                summary.rejected += 1;
                continue;
            }
        };

        match submit(store, &email, survey).await {
            Ok(_) => summary.inserted += 1,
            Err(IntakeError::Validation(err)) => {
                warn!(line, error = %err, "skipping CSV row");
                summary.rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_survey;
    use crate::risk::Diagnosis;
    use crate::store::LocalFileBackend;

    fn store_in(dir: &tempfile::TempDir) -> AnalysisStore<LocalFileBackend> {
        AnalysisStore::new(LocalFileBackend::new(dir.path()))
    }

    #[tokio::test]
    async fn submission_is_classified_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let (record, assessment) = submit(&store, " Pat@Example.com", sample_survey()).await.unwrap();
        assert_eq!(assessment.diagnosis, Diagnosis::Normal);
        assert_eq!(record.diagnosis, "Normal");
        assert_eq!(record.severity, 0);
        assert_eq!(record.user_email, "pat@example.com");
        assert_eq!(store.require(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn invalid_submission_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut survey = sample_survey();
        survey.heart_rate = 20;

        let err = submit(&store, "pat@example.com", survey).await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
        assert!(store.list_all(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn csv_import_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let csv = "\
user_email,phone,age,gender,occupation,stress,blood_pressure,heart_rate,sleep_duration,bmi_category,snoring_frequency,working_hours
a@x.io,5550001,50,Male,Driver,5,150,95,4,Obese,6,8
b@x.io,5550002,30,female,,3,118,70,8,normal,0,8
c@x.io,,30,Female,,3,118,70,8,Normal,0,8
d@x.io,5550004,30,Robot,,3,118,70,8,Normal,0,8
e@x.io,5550005,thirty,Female,,3,118,70,8,Normal,0,8
";

        let summary = import_csv(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(summary, ImportSummary { inserted: 2, rejected: 3 });

        let apnea = store.list_by_user("a@x.io", 5).await.unwrap();
        assert_eq!(apnea[0].severity, 3);
        assert_eq!(apnea[0].diagnosis, Diagnosis::ObstructiveSleepApnea.label());
    }
}
