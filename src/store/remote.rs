use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::{StorageBackend, StoreError};
use crate::models::{AnalysisRecord, BmiCategory, Gender, SurveyInput, UserCredential};

const ANALYSIS_COLUMNS: &str = "id, created_at, user_email, phone, age, gender, occupation, \
     stress, blood_pressure, heart_rate, sleep_duration, bmi_category, \
     snoring_frequency, working_hours, diagnosis, severity";

/// Postgres tables `sleep_screening.users` and `sleep_screening.analyses`.
pub struct RemoteBackend {
    pool: PgPool,
}

impl RemoteBackend {
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("remote schema is up to date");
        Ok(())
    }
}

impl StorageBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
        let survey = &record.survey;
        let query = format!(
            r#"
            INSERT INTO sleep_screening.analyses ({ANALYSIS_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            RETURNING {ANALYSIS_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(record.id)
            .bind(record.created_at)
            .bind(&record.user_email)
            .bind(&survey.phone)
            .bind(survey.age)
            .bind(survey.gender.label())
            .bind(&survey.occupation)
            .bind(survey.stress)
            .bind(survey.blood_pressure)
            .bind(survey.heart_rate)
            .bind(survey.sleep_duration)
            .bind(survey.bmi_category.label())
            .bind(survey.snoring_frequency)
            .bind(survey.working_hours)
            .bind(&record.diagnosis)
            .bind(i16::from(record.severity))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => analysis_from_row(&row),
            None => Err(StoreError::Conflict(record.id)),
        }
    }

    async fn analysis_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        let query = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM sleep_screening.analyses WHERE id = $1 LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(analysis_from_row).transpose()
    }

    async fn analyses_for_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let query = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM sleep_screening.analyses \
             WHERE user_email = $1 ORDER BY created_at DESC, seq ASC LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(email)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(analysis_from_row).collect()
    }

    async fn all_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        let query = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM sleep_screening.analyses \
             ORDER BY created_at DESC, seq ASC LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(analysis_from_row).collect()
    }

    async fn clear_analyses(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sleep_screening.analyses")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sleep_screening.users (email, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn password_hash(&self, email: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT password_hash FROM sleep_screening.users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("password_hash")).transpose()?)
    }

    async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
        let rows = sqlx::query("SELECT email, password_hash FROM sleep_screening.users ORDER BY email")
            .fetch_all(&self.pool)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(UserCredential {
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
            });
        }
        Ok(users)
    }

    async fn clear_users(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sleep_screening.users")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn analysis_from_row(row: &PgRow) -> Result<AnalysisRecord, StoreError> {
    let gender: String = row.try_get("gender")?;
    let bmi_category: String = row.try_get("bmi_category")?;
    let severity: i16 = row.try_get("severity")?;

    let gender = gender
        .parse::<Gender>()
        .map_err(|err| StoreError::InvalidRow(err.to_string()))?;
    let bmi_category = bmi_category
        .parse::<BmiCategory>()
        .map_err(|err| StoreError::InvalidRow(err.to_string()))?;
    let severity = u8::try_from(severity)
        .map_err(|_| StoreError::InvalidRow(format!("severity {severity} out of range")))?;

    Ok(AnalysisRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        user_email: row.try_get("user_email")?,
        survey: SurveyInput {
            phone: row.try_get("phone")?,
            age: row.try_get("age")?,
            gender,
            occupation: row.try_get("occupation")?,
            stress: row.try_get("stress")?,
            blood_pressure: row.try_get("blood_pressure")?,
            heart_rate: row.try_get("heart_rate")?,
            sleep_duration: row.try_get("sleep_duration")?,
            bmi_category,
            snoring_frequency: row.try_get("snoring_frequency")?,
            working_hours: row.try_get("working_hours")?,
        },
        diagnosis: row.try_get("diagnosis")?,
        severity,
    })
}
