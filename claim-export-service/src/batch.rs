use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::assembler::{ClaimMessageAssembler, ControlIdSequence};
use crate::error::ExportResult;
use crate::models::{ClaimRecord, GeneratedMessage, Manifest, ManifestEntry};

/// File name of the manifest written at the end of a batch.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One claim that failed generation or persistence. The batch continues
/// past it; one bad claim must not block the rest.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub claim: String,
    pub error: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub generated: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
    pub manifest_path: PathBuf,
}

/// Writes generated messages and their metadata sidecars to the output
/// directory and accumulates the delivery manifest.
#[derive(Debug, Clone)]
pub struct BatchFileWriter {
    output_dir: PathBuf,
}

impl BatchFileWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Generate and persist every claim in order. Construction and I/O
    /// failures are recorded per claim; the manifest holds only the claims
    /// that were fully persisted.
    pub fn write_batch(
        &self,
        claims: &[ClaimRecord],
        assembler: &ClaimMessageAssembler,
        sequence: &mut ControlIdSequence,
    ) -> ExportResult<BatchSummary> {
        fs::create_dir_all(&self.output_dir)?;

        let mut manifest = Manifest::new(Utc::now());
        let mut failures = Vec::new();

        for claim in claims {
            let label = claim.label();
            let message = match assembler.assemble(claim, sequence) {
                Ok(message) => message,
                Err(error) => {
                    warn!(claim = %label, %error, "claim failed message generation");
                    failures.push(BatchFailure {
                        claim: label,
                        error: error.to_string(),
                    });
                    continue;
                }
            };
            match self.persist(claim, &message) {
                Ok(entry) => {
                    info!(
                        claim = %label,
                        control_id = message.control_id(),
                        file = %entry.hl7_file.display(),
                        "message written"
                    );
                    manifest.entries.push(entry);
                }
                Err(error) => {
                    warn!(claim = %label, %error, "claim failed persistence");
                    failures.push(BatchFailure {
                        claim: label,
                        error: error.to_string(),
                    });
                }
            }
        }

        let manifest_path = self.output_dir.join(MANIFEST_FILE);
        manifest.save(&manifest_path)?;
        info!(
            generated = manifest.entries.len(),
            failed = failures.len(),
            manifest = %manifest_path.display(),
            "batch complete"
        );

        Ok(BatchSummary {
            generated: manifest.entries.len(),
            failed: failures.len(),
            failures,
            manifest_path,
        })
    }

    fn persist(
        &self,
        claim: &ClaimRecord,
        message: &GeneratedMessage,
    ) -> ExportResult<ManifestEntry> {
        let stem = self.reserve_stem(&file_stem(claim));
        let hl7_file = self.output_dir.join(format!("{stem}.hl7"));
        let meta_file = self.output_dir.join(format!("{stem}_meta.json"));

        fs::write(&hl7_file, message.raw_text())?;
        let metadata = message.metadata().clone().with_file(&hl7_file);
        fs::write(&meta_file, serde_json::to_string_pretty(&metadata)?)?;

        Ok(ManifestEntry {
            control_id: message.control_id().to_string(),
            claim_id: metadata.claim_id,
            patient_name: metadata.patient_name,
            date_of_service: metadata.date_of_service,
            total_charge: metadata.total_charge,
            hl7_file,
            meta_file,
        })
    }

    /// Identical name+date claims get a distinguishing suffix, never an
    /// overwrite.
    fn reserve_stem(&self, stem: &str) -> String {
        if !self.stem_taken(stem) {
            return stem.to_string();
        }
        let mut attempt = 2u32;
        loop {
            let candidate = format!("{stem}_{attempt}");
            if !self.stem_taken(&candidate) {
                return candidate;
            }
            attempt += 1;
        }
    }

    fn stem_taken(&self, stem: &str) -> bool {
        self.output_dir.join(format!("{stem}.hl7")).exists()
            || self.output_dir.join(format!("{stem}_meta.json")).exists()
    }
}

/// Deterministic file stem from patient identity and date of service,
/// reduced to filename-safe characters.
fn file_stem(claim: &ClaimRecord) -> String {
    let raw = format!(
        "{}_{}_{}",
        claim.patient.family_name.to_uppercase(),
        claim.patient.given_name.to_uppercase(),
        claim.visit.date_of_service.format("%m%d%y")
    );
    raw.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}
