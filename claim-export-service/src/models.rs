use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExportResult;

/// One medical claim as extracted upstream. Constructed once, consumed once
/// by the assembler, never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Optional upstream identifier, used for operator-facing labels.
    #[serde(default)]
    pub claim_id: Option<String>,
    pub patient: Patient,
    pub insurance: InsuranceCoverage,
    pub visit: Visit,
    pub service_lines: Vec<ServiceLine>,
    /// ICD-10 codes the service lines may reference. A line referencing a
    /// code not listed here is a construction error.
    pub diagnoses: Vec<String>,
    /// Declared total; the encoder recomputes and cross-checks it.
    pub total_charge: Decimal,
}

impl ClaimRecord {
    /// Operator-facing label: the upstream id when present, otherwise
    /// patient identity plus date of service.
    pub fn label(&self) -> String {
        match &self.claim_id {
            Some(id) => id.clone(),
            None => format!(
                "{}_{}_{}",
                self.patient.family_name,
                self.patient.given_name,
                self.visit.date_of_service.format("%m%d%y")
            ),
        }
    }
}

/// Patient identity and demographics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub family_name: String,
    pub given_name: String,
    pub date_of_birth: NaiveDate,
    pub address: PostalAddress,
    #[serde(default)]
    pub phone: Option<String>,
    /// Absent when the receiving system auto-assigns the MRN.
    #[serde(default)]
    pub medical_record_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

/// Primary insurance coverage; one payer per claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceCoverage {
    pub payer_name: String,
    pub member_id: String,
    #[serde(default)]
    pub group_number: Option<String>,
}

/// Visit-level provider and facility context shared by all service lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub provider_npi: String,
    pub provider_name: String,
    pub facility_name: String,
    /// Place-of-service code lines inherit when they declare none.
    pub place_of_service: String,
    pub date_of_service: NaiveDate,
}

/// One billable service line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLine {
    pub cpt_code: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub charge: Decimal,
    #[serde(default = "default_units")]
    pub units: u32,
    #[serde(default)]
    pub place_of_service: Option<String>,
    pub diagnosis_codes: Vec<String>,
}

fn default_units() -> u32 {
    1
}

/// Audit record persisted beside each message file. Never re-parsed to
/// regenerate the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub claim_id: String,
    pub control_id: String,
    pub generated_at: DateTime<Utc>,
    pub patient_name: String,
    pub date_of_service: NaiveDate,
    pub total_charge: Decimal,
    pub line_count: usize,
    #[serde(default)]
    pub hl7_file: Option<PathBuf>,
    pub status: String,
}

impl MessageMetadata {
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hl7_file = Some(path.into());
        self
    }
}

/// Encoder output. Immutable once produced: re-delivery reuses the same
/// text and control ID so the receiver can deduplicate retries.
#[derive(Debug, Clone)]
pub struct GeneratedMessage {
    control_id: String,
    raw_text: String,
    metadata: MessageMetadata,
}

impl GeneratedMessage {
    pub(crate) fn new(control_id: String, raw_text: String, metadata: MessageMetadata) -> Self {
        Self {
            control_id,
            raw_text,
            metadata,
        }
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }
}

/// One generated message as tracked for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub control_id: String,
    pub claim_id: String,
    pub patient_name: String,
    pub date_of_service: NaiveDate,
    pub total_charge: Decimal,
    pub hl7_file: PathBuf,
    pub meta_file: PathBuf,
}

/// Ordered list of generated messages. The manifest is the source of truth
/// for delivery; the output directory is never re-scanned to derive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            entries: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> ExportResult<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ExportResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}
