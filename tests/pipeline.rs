use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use sleep_risk_screening::access::{AccessError, AdminGate, RequestContext};
use sleep_risk_screening::auth::{CredentialStore, PasswordPolicy, MIN_ROUNDS};
use sleep_risk_screening::intake;
use sleep_risk_screening::report;
use sleep_risk_screening::store::{AnalysisStore, FallbackStore, LocalFileBackend, RemoteBackend};
use sleep_risk_screening::{AnalysisDraft, BmiCategory, Diagnosis, Gender, SurveyInput};

type Backend = Arc<FallbackStore<RemoteBackend, LocalFileBackend>>;

fn open(dir: &tempfile::TempDir) -> (AnalysisStore<Backend>, CredentialStore<Backend>) {
    let backend: Backend = Arc::new(FallbackStore::new(
        None,
        LocalFileBackend::new(dir.path()),
        Duration::from_secs(1),
    ));
    (
        AnalysisStore::new(backend.clone()),
        CredentialStore::new(backend, PasswordPolicy::with_rounds(MIN_ROUNDS)),
    )
}

fn apnea_survey() -> SurveyInput {
    SurveyInput {
        phone: "5550199".to_string(),
        age: 55,
        gender: Gender::Male,
        occupation: "Truck Driver".to_string(),
        stress: 6,
        blood_pressure: 152.0,
        heart_rate: 92,
        sleep_duration: 5.0,
        bmi_category: BmiCategory::Obese,
        snoring_frequency: 6,
        working_hours: 10,
    }
}

#[tokio::test]
async fn patient_submission_flows_through_to_report() {
    let dir = tempfile::tempdir().unwrap();
    let (analyses, credentials) = open(&dir);

    assert!(credentials.register("Sam@Clinic.org ", "secret1").await.unwrap());
    assert!(!credentials.register("sam@clinic.org", "other99").await.unwrap());
    assert!(credentials.verify("sam@clinic.org", "secret1").await.unwrap());
    assert!(!credentials.verify("sam@clinic.org", "wrong").await.unwrap());

    let (record, assessment) = intake::submit(&analyses, "sam@clinic.org", apnea_survey())
        .await
        .unwrap();
    assert_eq!(assessment.diagnosis, Diagnosis::ObstructiveSleepApnea);
    assert_eq!(record.severity, 3);

    let patient = RequestContext::patient("sam@clinic.org");
    let fetched = analyses.require(record.id).await.unwrap();
    patient.require_view(&fetched).unwrap();
    assert_eq!(
        RequestContext::patient("other@clinic.org").require_view(&fetched),
        Err(AccessError::Unauthorized)
    );

    let doc = report::build_report(&fetched);
    let text = doc.text_lines().join("\n");
    assert!(text.contains("Email: sam@clinic.org"));
    assert!(text.contains("Primary Diagnosis: High Risk: Possible Obstructive Sleep Apnea"));
    assert!(text.contains("Risk Level: RED - High Risk / Urgent (Severity: 3/3)"));
    assert!(report::render_pdf(&doc).unwrap().starts_with(b"%PDF"));
}

#[tokio::test]
async fn history_is_newest_first_and_scoped_to_the_patient() {
    let dir = tempfile::tempdir().unwrap();
    let (analyses, _) = open(&dir);

    for (email, day) in [("a@x.io", 1), ("b@x.io", 2), ("a@x.io", 3), ("a@x.io", 2)] {
        let mut draft = AnalysisDraft::new(email, apnea_survey(), "Normal", 0);
        draft.created_at = Some(Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap());
        analyses.save(draft).await.unwrap();
    }

    let days: Vec<u32> = analyses
        .list_by_user("a@x.io", 50)
        .await
        .unwrap()
        .iter()
        .map(|r| chrono::Datelike::day(&r.created_at))
        .collect();
    assert_eq!(days, vec![3, 2, 1]);

    assert_eq!(analyses.list_all(2).await.unwrap().len(), 2);
    assert_eq!(analyses.list_all(200).await.unwrap().len(), 4);
}

#[tokio::test]
async fn admin_sees_everything_and_can_purge() {
    let dir = tempfile::tempdir().unwrap();
    let (analyses, credentials) = open(&dir);
    credentials.register("sam@clinic.org", "secret1").await.unwrap();
    let (record, _) = intake::submit(&analyses, "sam@clinic.org", apnea_survey())
        .await
        .unwrap();

    let gate = AdminGate::new(Some("letmein".to_string()));
    assert_eq!(gate.authenticate("nope"), Err(AccessError::InvalidAdminPassword));
    let admin = gate.authenticate("letmein").unwrap();
    admin.require_view(&record).unwrap();

    assert_eq!(analyses.purge().await.unwrap(), 1);
    assert_eq!(credentials.purge().await.unwrap(), 1);
    assert!(analyses.list_all(200).await.unwrap().is_empty());
    assert!(!credentials.verify("sam@clinic.org", "secret1").await.unwrap());
}
