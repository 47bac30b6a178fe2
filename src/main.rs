use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sleep_risk_screening::access::{AccessError, AdminGate, RequestContext};
use sleep_risk_screening::auth::{self, CredentialStore, PasswordPolicy};
use sleep_risk_screening::config::{AppConfig, DEFAULT_LOG_FILTER};
use sleep_risk_screening::intake;
use sleep_risk_screening::models::{BmiCategory, Gender, SurveyInput};
use sleep_risk_screening::normalizer::{self, RawSurvey};
use sleep_risk_screening::report;
use sleep_risk_screening::risk;
use sleep_risk_screening::store::{
    AnalysisFilter, AnalysisStore, FallbackStore, LocalFileBackend, RemoteBackend,
    StorageBackend, DEFAULT_ADMIN_LIMIT, DEFAULT_USER_LIMIT,
};

type Backend = Arc<FallbackStore<RemoteBackend, LocalFileBackend>>;

#[derive(Parser)]
#[command(name = "sleep-risk-screening")]
#[command(about = "Sleep disorder risk screening for patient sleep-health surveys", long_about = None)]
struct Cli {
    /// Directory for the local JSON store (overrides SLEEP_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PatientLogin {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct AdminLogin {
    #[arg(long)]
    admin_password: String,
}

#[derive(Args)]
struct SurveyArgs {
    #[arg(long)]
    phone: String,
    #[arg(long)]
    age: i32,
    #[arg(long)]
    gender: Gender,
    #[arg(long, default_value = "")]
    occupation: String,
    /// Stress level, 0 (low) to 10 (high)
    #[arg(long)]
    stress: i32,
    /// Systolic blood pressure in mmHg
    #[arg(long)]
    blood_pressure: f64,
    #[arg(long)]
    heart_rate: i32,
    /// Hours of sleep per night
    #[arg(long)]
    sleep_duration: f64,
    #[arg(long)]
    bmi_category: BmiCategory,
    /// Snoring episodes per week
    #[arg(long)]
    snoring_frequency: i32,
    /// Working hours per day
    #[arg(long)]
    working_hours: i32,
}

impl From<SurveyArgs> for SurveyInput {
    fn from(args: SurveyArgs) -> Self {
        SurveyInput {
            phone: args.phone,
            age: args.age,
            gender: args.gender,
            occupation: args.occupation,
            stress: args.stress,
            blood_pressure: args.blood_pressure,
            heart_rate: args.heart_rate,
            sleep_duration: args.sleep_duration,
            bmi_category: args.bmi_category,
            snoring_frequency: args.snoring_frequency,
            working_hours: args.working_hours,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Pdf,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the remote database schema
    InitDb,
    /// Classify a survey JSON file without storing anything
    Classify {
        #[arg(long)]
        json: PathBuf,
    },
    #[command(flatten)]
    Store(StoreCommands),
}

/// Commands that open the analysis and credential stores.
#[derive(Subcommand)]
enum StoreCommands {
    /// Register a patient account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Submit a survey, classify it and store the analysis
    Analyze {
        #[command(flatten)]
        login: PatientLogin,
        #[command(flatten)]
        survey: SurveyArgs,
    },
    /// List your own analyses, newest first
    History {
        #[command(flatten)]
        login: PatientLogin,
        #[arg(long, default_value_t = DEFAULT_USER_LIMIT)]
        limit: usize,
    },
    /// Render the report for one analysis
    #[command(group(
        ArgGroup::new("who")
            .args(["email", "admin_password"])
            .required(true)
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        id: Uuid,
        #[arg(long, requires = "password")]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        admin_password: Option<String>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Pdf)]
        format: ReportFormat,
        /// Output file; defaults to report-<id>.pdf, or stdout for markdown
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import survey rows from a CSV file (admin)
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[command(flatten)]
        admin: AdminLogin,
    },
    /// Hospital action panel
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// List all analyses with urgency, newest first
    List {
        #[command(flatten)]
        admin: AdminLogin,
        #[arg(long, default_value_t = DEFAULT_ADMIN_LIMIT)]
        limit: usize,
        #[arg(long)]
        email_contains: Option<String>,
        #[arg(long)]
        diagnosis: Option<String>,
        #[arg(long)]
        severity: Option<u8>,
    },
    /// Generate a markdown summary of recent analyses
    Summary {
        #[command(flatten)]
        admin: AdminLogin,
        #[arg(long, default_value_t = DEFAULT_ADMIN_LIMIT)]
        limit: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export all users and analyses as one JSON document
    Export {
        #[command(flatten)]
        admin: AdminLogin,
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete every stored user and analysis
    Purge {
        #[command(flatten)]
        admin: AdminLogin,
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn connect_remote(config: &AppConfig) -> Option<RemoteBackend> {
    let Some(url) = config.database_url.as_deref() else {
        info!("DATABASE_URL not set, using local store only");
        return None;
    };
    match tokio::time::timeout(config.remote_timeout, RemoteBackend::connect(url, config.remote_timeout)).await {
        Ok(Ok(remote)) => Some(remote),
        Ok(Err(err)) => {
            warn!(error = %err, "remote store unavailable, using local store");
            None
        }
        Err(_) => {
            warn!(timeout = ?config.remote_timeout, "remote store connection timed out, using local store");
            None
        }
    }
}

async fn login_patient(
    credentials: &CredentialStore<Backend>,
    login: &PatientLogin,
) -> anyhow::Result<RequestContext> {
    if credentials.verify(&login.email, &login.password).await? {
        Ok(RequestContext::patient(auth::normalize_email(&login.email)))
    } else {
        Err(AccessError::InvalidCredentials.into())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::InitDb => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to a Postgres instance")?;
            let remote = RemoteBackend::connect(url, config.remote_timeout)
                .await
                .context("failed to connect to Postgres")?;
            remote.init_db().await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Classify { json } => {
            let text = std::fs::read_to_string(&json)
                .with_context(|| format!("failed to read {}", json.display()))?;
            let raw = RawSurvey::from_json_str(&text)
                .with_context(|| format!("{} is not valid JSON", json.display()))?;
            let assessment = risk::classify_features(&normalizer::normalize(&raw));
            print_assessment(&assessment);
            return Ok(());
        }
        Commands::Store(command) => run(command, config).await,
    }
}

async fn run(command: StoreCommands, config: AppConfig) -> anyhow::Result<()> {
    let remote = connect_remote(&config).await;
    let backend: Backend = Arc::new(FallbackStore::new(
        remote,
        LocalFileBackend::new(&config.data_dir),
        config.remote_timeout,
    ));
    info!(remote = backend.has_remote(), data_dir = %config.data_dir.display(), "store ready");
    let analyses = AnalysisStore::new(backend.clone());
    let credentials = CredentialStore::new(
        backend.clone(),
        PasswordPolicy::with_rounds(config.pbkdf2_rounds),
    );
    let gate = AdminGate::new(config.admin_password.clone());

    match command {
        StoreCommands::Register { email, password } => {
            auth::validate_registration(&email, &password)?;
            if credentials.register(&email, &password).await? {
                println!("Account created for {}.", auth::normalize_email(&email));
            } else {
                bail!("email already registered, please log in or use a different email");
            }
        }
        StoreCommands::Analyze { login, survey } => {
            let ctx = login_patient(&credentials, &login).await?;
            let email = ctx.require_patient()?;
            let (record, assessment) = intake::submit(&analyses, email, survey.into()).await?;
            print_assessment(&assessment);
            println!("Report ID: {}", record.id);
        }
        StoreCommands::History { login, limit } => {
            let ctx = login_patient(&credentials, &login).await?;
            let rows = analyses.list_by_user(ctx.require_patient()?, limit).await?;
            if rows.is_empty() {
                println!("No analysis records yet.");
                return Ok(());
            }
            for row in rows {
                println!(
                    "- {} age {} severity {} {} (report {})",
                    row.created_at.format("%Y-%m-%d %H:%M"),
                    row.survey.age,
                    row.severity,
                    row.diagnosis,
                    row.id
                );
            }
        }
        StoreCommands::Report {
            id,
            email,
            password,
            admin_password,
            format,
            out,
        } => {
            let ctx = match (email, password, admin_password) {
                (Some(email), Some(password), _) => {
                    login_patient(&credentials, &PatientLogin { email, password }).await?
                }
                (_, _, Some(secret)) => gate.authenticate(&secret)?,
                _ => bail!("either --email/--password or --admin-password is required"),
            };
            let record = analyses.require(id).await?;
            ctx.require_view(&record)?;

            let doc = report::build_report(&record);
            match format {
                ReportFormat::Pdf => {
                    let bytes = report::render_pdf(&doc)?;
                    let out = out.unwrap_or_else(|| PathBuf::from(format!("report-{id}.pdf")));
                    std::fs::write(&out, bytes)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Report written to {}.", out.display());
                }
                ReportFormat::Markdown => {
                    let text = report::render_markdown(&doc);
                    match out {
                        Some(out) => {
                            std::fs::write(&out, text)
                                .with_context(|| format!("failed to write {}", out.display()))?;
                            println!("Report written to {}.", out.display());
                        }
                        None => print!("{text}"),
                    }
                }
            }
        }
        StoreCommands::Import { csv, admin } => {
            gate.authenticate(&admin.admin_password)?.require_admin()?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = intake::import_csv(&analyses, file).await?;
            println!(
                "Imported {} analyses from {} ({} rows rejected).",
                summary.inserted,
                csv.display(),
                summary.rejected
            );
        }
        StoreCommands::Admin { command } => run_admin(command, &gate, &analyses, &credentials).await?,
    }

    Ok(())
}

async fn run_admin(
    command: AdminCommands,
    gate: &AdminGate,
    analyses: &AnalysisStore<Backend>,
    credentials: &CredentialStore<Backend>,
) -> anyhow::Result<()> {
    match command {
        AdminCommands::List {
            admin,
            limit,
            email_contains,
            diagnosis,
            severity,
        } => {
            gate.authenticate(&admin.admin_password)?.require_admin()?;
            let filter = AnalysisFilter {
                email_contains,
                diagnosis,
                severity,
            };
            let rows = filter.apply(analyses.list_all(limit).await?);
            if rows.is_empty() {
                println!("No patient analyses found.");
                return Ok(());
            }
            println!("Found {} analyses:", rows.len());
            for row in rows {
                println!(
                    "- [{}] {} {} phone {} age {}: {} (severity {}, report {})",
                    risk::urgency(row.severity),
                    row.created_at.format("%Y-%m-%d %H:%M"),
                    row.user_email,
                    row.survey.phone,
                    row.survey.age,
                    row.diagnosis,
                    row.severity,
                    row.id
                );
            }
        }
        AdminCommands::Summary { admin, limit, out } => {
            gate.authenticate(&admin.admin_password)?.require_admin()?;
            let rows = analyses.list_all(limit).await?;
            let summary = report::build_admin_summary(&rows);
            match out {
                Some(out) => {
                    std::fs::write(&out, summary)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Summary written to {}.", out.display());
                }
                None => print!("{summary}"),
            }
        }
        AdminCommands::Export { admin, out } => {
            gate.authenticate(&admin.admin_password)?.require_admin()?;
            let users: BTreeMap<String, String> = credentials
                .users()
                .await?
                .into_iter()
                .map(|u| (u.email, u.password_hash))
                .collect();
            let rows = analyses.list_all(usize::MAX).await?;
            let document = serde_json::json!({ "users": users, "analyses": rows });
            std::fs::write(&out, serde_json::to_vec_pretty(&document)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Exported {} users and {} analyses to {}.",
                users.len(),
                rows.len(),
                out.display()
            );
        }
        AdminCommands::Purge { admin, yes } => {
            gate.authenticate(&admin.admin_password)?.require_admin()?;
            if !yes {
                bail!("refusing to delete all data without --yes");
            }
            let analyses_purged = analyses.purge().await;
            let users_purged = credentials.purge().await;
            let removed_analyses = analyses_purged.context("failed to purge analyses")?;
            let removed_users = users_purged.context("failed to purge users")?;
            warn!(removed_analyses, removed_users, backend = analyses.backend().name(), "store purged");
            println!("Deleted {removed_users} users and {removed_analyses} analyses.");
        }
    }

    Ok(())
}

fn print_assessment(assessment: &risk::Assessment) {
    println!(
        "[{}] {} (severity {}/3)",
        risk::urgency(assessment.severity),
        assessment.diagnosis,
        assessment.severity
    );
    println!(
        "Scores: apnea {}, insomnia {}, deprivation {}",
        assessment.scores.apnea, assessment.scores.insomnia, assessment.scores.deprivation
    );
    for reason in &assessment.rationale {
        println!("  - {reason}");
    }
}
