//! Sleep-health survey screening: rule-based risk classification, dual-backend
//! persistence of analyses and credentials, and patient PDF reports.

pub mod access;
pub mod auth;
pub mod config;
pub mod intake;
pub mod models;
pub mod normalizer;
pub mod report;
pub mod risk;
pub mod store;

pub use models::{AnalysisDraft, AnalysisRecord, BmiCategory, Gender, SurveyInput, UserCredential};
pub use risk::{classify, Assessment, Diagnosis};
