use chrono::{DateTime, Utc};
use rand::Rng;

use hl7_codec::{
    ChargeLine, DftP03Message, InsuranceInfo, MessageHeader, PatientIdentity, VisitContext,
};

use crate::error::{ExportError, ExportResult};
use crate::models::{ClaimRecord, GeneratedMessage, MessageMetadata, ServiceLine};

/// Sidecar status marker for freshly generated messages.
pub const STATUS_READY_FOR_IMPORT: &str = "ready_for_import";

/// Explicit control-ID state, injected by the caller so tests can supply a
/// deterministic sequence. Control IDs must never repeat within a run: the
/// receiver deduplicates retries by control ID, so a collision risks a new
/// claim being dropped as a duplicate of an old one.
#[derive(Debug, Clone)]
pub struct ControlIdSequence {
    prefix: String,
    counter: u64,
}

impl ControlIdSequence {
    /// Production sequence: timestamp-derived prefix plus a random suffix,
    /// so two processes started within the same second stay distinguishable.
    pub fn new() -> Self {
        let suffix = rand::thread_rng().gen_range(0..10_000u16);
        Self::with_prefix(format!(
            "CP{}{:04}",
            Utc::now().format("%Y%m%d%H%M%S"),
            suffix
        ))
    }

    /// Fixed prefix, for deterministic tests.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.prefix, self.counter)
    }
}

impl Default for ControlIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps claim records onto the values the message builder expects. Pure
/// transformation: no network or file-system side effects.
#[derive(Debug, Clone)]
pub struct ClaimMessageAssembler {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
}

impl Default for ClaimMessageAssembler {
    fn default() -> Self {
        Self {
            sending_application: "CHARGEPOST".to_string(),
            sending_facility: "CHARGEPOST".to_string(),
            receiving_application: "COLLABORATEMD".to_string(),
            receiving_facility: "COLLABORATEMD".to_string(),
        }
    }
}

impl ClaimMessageAssembler {
    /// Assemble one claim into an immutable generated message, stamped with
    /// the current time.
    pub fn assemble(
        &self,
        claim: &ClaimRecord,
        sequence: &mut ControlIdSequence,
    ) -> ExportResult<GeneratedMessage> {
        self.assemble_at(claim, sequence, Utc::now())
    }

    /// Assemble with an explicit timestamp. Deterministic given identical
    /// input, timestamp, and control-ID prefix.
    pub fn assemble_at(
        &self,
        claim: &ClaimRecord,
        sequence: &mut ControlIdSequence,
        generated_at: DateTime<Utc>,
    ) -> ExportResult<GeneratedMessage> {
        validate_lines(claim)?;

        let control_id = sequence.next_id();
        let message = DftP03Message {
            header: MessageHeader {
                sending_application: self.sending_application.clone(),
                sending_facility: self.sending_facility.clone(),
                receiving_application: self.receiving_application.clone(),
                receiving_facility: self.receiving_facility.clone(),
                control_id: control_id.clone(),
                timestamp: generated_at,
            },
            patient: PatientIdentity {
                family_name: claim.patient.family_name.clone(),
                given_name: claim.patient.given_name.clone(),
                date_of_birth: claim.patient.date_of_birth,
                street: claim.patient.address.street.clone(),
                city: claim.patient.address.city.clone(),
                state: claim.patient.address.state.clone(),
                zip: claim.patient.address.zip.clone(),
                phone: digits_only(claim.patient.phone.as_deref().unwrap_or_default()),
                medical_record_number: claim
                    .patient
                    .medical_record_number
                    .clone()
                    .unwrap_or_default(),
            },
            visit: VisitContext {
                facility_name: claim.visit.facility_name.clone(),
                provider_npi: claim.visit.provider_npi.clone(),
                date_of_service: claim.visit.date_of_service,
            },
            insurance: InsuranceInfo {
                payer_name: claim.insurance.payer_name.clone(),
                member_id: claim.insurance.member_id.clone(),
                group_number: claim.insurance.group_number.clone().unwrap_or_default(),
            },
            lines: claim
                .service_lines
                .iter()
                .map(|line| charge_line(line, &claim.visit.place_of_service))
                .collect(),
            declared_total: Some(claim.total_charge),
        };

        let total = message.line_total();
        let line_count = message.lines.len();
        let raw_text = message.encode()?;

        let metadata = MessageMetadata {
            claim_id: claim.label(),
            control_id: control_id.clone(),
            generated_at,
            patient_name: format!(
                "{}, {}",
                claim.patient.family_name, claim.patient.given_name
            ),
            date_of_service: claim.visit.date_of_service,
            total_charge: total,
            line_count,
            hl7_file: None,
            status: STATUS_READY_FOR_IMPORT.to_string(),
        };

        Ok(GeneratedMessage::new(control_id, raw_text, metadata))
    }
}

fn charge_line(line: &ServiceLine, visit_pos: &str) -> ChargeLine {
    ChargeLine {
        cpt_code: line.cpt_code.clone(),
        modifiers: line.modifiers.concat(),
        charge: line.charge,
        units: line.units,
        place_of_service: line
            .place_of_service
            .clone()
            .unwrap_or_else(|| visit_pos.to_string()),
        diagnosis_codes: line.diagnosis_codes.clone(),
    }
}

/// Construction-time checks the wire encoder cannot express: diagnosis
/// references must resolve against the claim, units must be positive.
fn validate_lines(claim: &ClaimRecord) -> ExportResult<()> {
    for (index, line) in claim.service_lines.iter().enumerate() {
        let number = index + 1;
        if line.units == 0 {
            return Err(ExportError::InvalidClaim(format!(
                "service line {number} has zero units"
            )));
        }
        for code in &line.diagnosis_codes {
            if !claim.diagnoses.contains(code) {
                return Err(ExportError::UnknownDiagnosis {
                    line: number,
                    code: code.clone(),
                });
            }
        }
    }
    Ok(())
}

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InsuranceCoverage, Patient, PostalAddress, Visit};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    fn sample_claim() -> ClaimRecord {
        ClaimRecord {
            claim_id: Some("LEVY_ISABELLA_112425".to_string()),
            patient: Patient {
                family_name: "LEVY".to_string(),
                given_name: "ISABELLA".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(2010, 5, 4).unwrap(),
                address: PostalAddress {
                    street: "896 EAST 8TH STREET".to_string(),
                    city: "BROOKLYN".to_string(),
                    state: "NY".to_string(),
                    zip: "11203".to_string(),
                },
                phone: Some("(917) 407-8435".to_string()),
                medical_record_number: None,
            },
            insurance: InsuranceCoverage {
                payer_name: "OXFORD".to_string(),
                member_id: "84111583206".to_string(),
                group_number: None,
            },
            visit: Visit {
                provider_npi: "1174537229".to_string(),
                provider_name: "ERIC CHA".to_string(),
                facility_name: "LENOX HILL HOSPITAL".to_string(),
                place_of_service: "23".to_string(),
                date_of_service: NaiveDate::from_ymd_opt(2025, 11, 24).unwrap(),
            },
            service_lines: vec![
                ServiceLine {
                    cpt_code: "13132".to_string(),
                    modifiers: Vec::new(),
                    charge: Decimal::new(144489, 2),
                    units: 1,
                    place_of_service: None,
                    diagnosis_codes: vec!["S61201A".to_string()],
                },
                ServiceLine {
                    cpt_code: "99282".to_string(),
                    modifiers: Vec::new(),
                    charge: Decimal::new(68921, 2),
                    units: 1,
                    place_of_service: None,
                    diagnosis_codes: vec!["S61201A".to_string()],
                },
            ],
            diagnoses: vec!["S61201A".to_string()],
            total_charge: Decimal::new(213410, 2),
        }
    }

    fn fixed_instant() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 9, 30, 5).unwrap()
    }

    #[test]
    fn control_ids_never_repeat_within_a_run() {
        let mut sequence = ControlIdSequence::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(sequence.next_id()));
        }
    }

    #[test]
    fn assembly_is_deterministic_given_seeded_sequence() {
        let assembler = ClaimMessageAssembler::default();
        let claim = sample_claim();
        let first = assembler
            .assemble_at(
                &claim,
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        let second = assembler
            .assemble_at(
                &claim,
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        assert_eq!(first.raw_text(), second.raw_text());
        assert_eq!(first.control_id(), "TEST-1");
    }

    #[test]
    fn phone_is_normalized_to_digits() {
        let assembler = ClaimMessageAssembler::default();
        let message = assembler
            .assemble_at(
                &sample_claim(),
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        assert!(message.raw_text().contains("|||9174078435\r"));
    }

    #[test]
    fn line_pos_defaults_to_visit_pos() {
        let assembler = ClaimMessageAssembler::default();
        let mut claim = sample_claim();
        claim.service_lines[0].place_of_service = Some("11".to_string());
        let message = assembler
            .assemble_at(
                &claim,
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        // Explicit POS on line one, inherited visit POS on line two.
        assert!(message.raw_text().contains("|DX|11|13132|"));
        assert!(message.raw_text().contains("|DX|23|99282|"));
    }

    #[test]
    fn dangling_diagnosis_reference_is_a_construction_error() {
        let assembler = ClaimMessageAssembler::default();
        let mut claim = sample_claim();
        claim.service_lines[1].diagnosis_codes = vec!["M25561".to_string()];
        match assembler.assemble_at(
            &claim,
            &mut ControlIdSequence::with_prefix("TEST"),
            fixed_instant(),
        ) {
            Err(ExportError::UnknownDiagnosis { line, code }) => {
                assert_eq!(line, 2);
                assert_eq!(code, "M25561");
            }
            other => panic!("expected UnknownDiagnosis, got {other:?}"),
        }
    }

    #[test]
    fn zero_units_are_rejected() {
        let assembler = ClaimMessageAssembler::default();
        let mut claim = sample_claim();
        claim.service_lines[0].units = 0;
        assert!(matches!(
            assembler.assemble_at(
                &claim,
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            ),
            Err(ExportError::InvalidClaim(_))
        ));
    }

    #[test]
    fn metadata_carries_recomputed_total_and_line_count() {
        let assembler = ClaimMessageAssembler::default();
        let message = assembler
            .assemble_at(
                &sample_claim(),
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        let metadata = message.metadata();
        assert_eq!(metadata.total_charge, Decimal::new(213410, 2));
        assert_eq!(metadata.line_count, 2);
        assert_eq!(metadata.patient_name, "LEVY, ISABELLA");
        assert_eq!(metadata.status, STATUS_READY_FOR_IMPORT);
        assert!(metadata.hl7_file.is_none());
    }

    #[test]
    fn modifiers_concatenate_for_the_wire() {
        let assembler = ClaimMessageAssembler::default();
        let mut claim = sample_claim();
        claim.service_lines[0].modifiers = vec!["25".to_string(), "59".to_string()];
        let message = assembler
            .assemble_at(
                &claim,
                &mut ControlIdSequence::with_prefix("TEST"),
                fixed_instant(),
            )
            .unwrap();
        assert!(message.raw_text().contains("|13132||2559|||"));
    }
}
