use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::{CodecError, CodecResult};
use crate::segment::{
    format_amount, format_date, format_timestamp, Field, Segment, ENCODING_CHARACTERS,
};

/// HL7 repeat-field numbering for this message type is two digits.
pub const MAX_SERVICE_LINES: usize = 99;

/// Caller-declared totals may disagree with the recomputed line sum by at
/// most one cent before the message is rejected.
const TOTAL_TOLERANCE_CENTS: i64 = 1;

/// MSH-level routing and identity for one message.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub control_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Patient identity and demographics destined for PID.
#[derive(Debug, Clone)]
pub struct PatientIdentity {
    pub family_name: String,
    pub given_name: String,
    pub date_of_birth: NaiveDate,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    /// Digits only; empty when unknown.
    pub phone: String,
    /// Empty when the receiving system assigns the MRN.
    pub medical_record_number: String,
}

/// Visit-level context shared by every service line (PV1, FT1-17).
#[derive(Debug, Clone)]
pub struct VisitContext {
    pub facility_name: String,
    pub provider_npi: String,
    pub date_of_service: NaiveDate,
}

/// Primary insurance for IN1; one payer per message.
#[derive(Debug, Clone)]
pub struct InsuranceInfo {
    pub payer_name: String,
    pub member_id: String,
    pub group_number: String,
}

/// One billable service line, emitted as an FT1/DG1 pair.
#[derive(Debug, Clone)]
pub struct ChargeLine {
    pub cpt_code: String,
    /// Modifiers already concatenated for FT1-14.
    pub modifiers: String,
    pub charge: Decimal,
    pub units: u32,
    pub place_of_service: String,
    /// Declaration order is preserved on the wire.
    pub diagnosis_codes: Vec<String>,
}

/// A complete DFT^P03 message ready for encoding.
///
/// Segment order is part of the wire contract:
/// `MSH, EVN, PID, PV1, IN1, (FT1, DG1){1..99}, BLG`.
#[derive(Debug, Clone)]
pub struct DftP03Message {
    pub header: MessageHeader,
    pub patient: PatientIdentity,
    pub visit: VisitContext,
    pub insurance: InsuranceInfo,
    pub lines: Vec<ChargeLine>,
    /// Optional caller-declared total, cross-checked against the line sum.
    pub declared_total: Option<Decimal>,
}

impl DftP03Message {
    /// Sum of line charges at cent precision. The encoded BLG always carries
    /// this recomputed value, never the declared total.
    pub fn line_total(&self) -> Decimal {
        self.lines
            .iter()
            .map(|line| line.charge)
            .sum::<Decimal>()
            .round_dp(2)
    }

    fn validate(&self) -> CodecResult<()> {
        if self.lines.is_empty() {
            return Err(CodecError::EmptyClaim);
        }
        if self.lines.len() > MAX_SERVICE_LINES {
            return Err(CodecError::LineLimitExceeded {
                count: self.lines.len(),
            });
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.diagnosis_codes.is_empty() {
                return Err(CodecError::MissingDiagnosis { line: index + 1 });
            }
        }
        if let Some(declared) = self.declared_total {
            let computed = self.line_total();
            let cents = Decimal::new(TOTAL_TOLERANCE_CENTS, 2);
            if (computed - declared.round_dp(2)).abs() > cents {
                return Err(CodecError::TotalMismatch { computed, declared });
            }
        }
        Ok(())
    }

    /// Encode the full message. Fails before emitting anything if the claim
    /// is structurally invalid.
    pub fn encode(&self) -> CodecResult<String> {
        self.validate()?;

        let timestamp = format_timestamp(self.header.timestamp);
        let service_date = format_date(self.visit.date_of_service);
        let patient_name = Field::components([
            self.patient.family_name.as_str(),
            self.patient.given_name.as_str(),
        ]);

        let mut message = String::new();
        message.push_str(&self.encode_msh(&timestamp)?);
        message.push_str(&self.encode_evn(&timestamp)?);
        message.push_str(&self.encode_pid()?);
        message.push_str(&self.encode_pv1(&service_date)?);
        message.push_str(&self.encode_in1(patient_name)?);
        for (index, line) in self.lines.iter().enumerate() {
            let sequence = index + 1;
            message.push_str(&self.encode_ft1(sequence, line, &service_date)?);
            message.push_str(&encode_dg1(sequence, line)?);
        }
        message.push_str(&self.encode_blg()?);
        Ok(message)
    }

    fn encode_msh(&self, timestamp: &str) -> CodecResult<String> {
        let mut msh = Segment::new("MSH");
        msh.push(Field::raw(ENCODING_CHARACTERS))
            .push(Field::text(&self.header.sending_application))
            .push(Field::text(&self.header.sending_facility))
            .push(Field::text(&self.header.receiving_application))
            .push(Field::text(&self.header.receiving_facility))
            .push(Field::text(timestamp))
            .push(Field::Empty)
            .push(Field::components(["DFT", "P03"]))
            .push(Field::text(&self.header.control_id))
            .push(Field::text("P"))
            .push(Field::text("2.3.1"));
        msh.encode()
    }

    fn encode_evn(&self, timestamp: &str) -> CodecResult<String> {
        let mut evn = Segment::new("EVN");
        evn.push(Field::text("P03")).push(Field::text(timestamp));
        evn.encode()
    }

    fn encode_pid(&self) -> CodecResult<String> {
        let mut pid = Segment::new("PID");
        pid.set(2, Field::text("1"))
            .set(
                4,
                Field::components([
                    self.patient.medical_record_number.as_str(),
                    "",
                    "",
                    "MRN",
                ]),
            )
            .set(
                5,
                Field::components([
                    self.patient.family_name.as_str(),
                    self.patient.given_name.as_str(),
                ]),
            )
            .set(7, Field::text(format_date(self.patient.date_of_birth)))
            .set(8, Field::text("U"))
            .set(
                10,
                Field::components([
                    self.patient.street.as_str(),
                    self.patient.city.as_str(),
                    self.patient.state.as_str(),
                    self.patient.zip.as_str(),
                ]),
            )
            .set(13, Field::text(&self.patient.phone));
        pid.encode()
    }

    fn encode_pv1(&self, service_date: &str) -> CodecResult<String> {
        let mut pv1 = Segment::new("PV1");
        pv1.set(2, Field::text("I"))
            .set(
                4,
                Field::components(["", "", "", self.visit.facility_name.as_str()]),
            )
            .set(39, Field::text(service_date));
        pv1.encode()
    }

    fn encode_in1(&self, patient_name: Field) -> CodecResult<String> {
        let mut in1 = Segment::new("IN1");
        in1.set(1, Field::text("1"))
            .set(2, Field::text(&self.insurance.payer_name))
            .set(15, Field::text(&self.insurance.member_id))
            .set(16, patient_name)
            .set(42, Field::text(&self.insurance.group_number));
        in1.encode()
    }

    fn encode_ft1(
        &self,
        sequence: usize,
        line: &ChargeLine,
        service_date: &str,
    ) -> CodecResult<String> {
        let charge = format_amount(line.charge);
        let mut ft1 = Segment::new("FT1");
        ft1.set(1, Field::text(sequence.to_string()))
            .set(2, Field::text("CLM"))
            .set(3, Field::text(format!("CLM{sequence:03}")))
            .set(5, Field::text("CH"))
            .set(6, Field::text(&charge))
            .set(7, Field::text(line.units.to_string()))
            .set(8, Field::text(&charge))
            .set(9, Field::text(service_date))
            .set(10, Field::text("DX"))
            .set(11, Field::text(&line.place_of_service))
            .set(12, Field::text(&line.cpt_code))
            .set(14, Field::text(&line.modifiers))
            .set(17, Field::text(&self.visit.provider_npi))
            .set(18, Field::text(&charge))
            .set(20, Field::text(&charge));
        ft1.encode()
    }

    fn encode_blg(&self) -> CodecResult<String> {
        let mut blg = Segment::new("BLG");
        blg.set(1, Field::text(format_amount(self.line_total())))
            .set(4, Field::text(&self.insurance.payer_name));
        blg.encode()
    }
}

/// DG1 carries the diagnosis linkage for one line; its set-ID matches the
/// FT1 line number. Each distinct code appears once even if the line links
/// it more than once.
fn encode_dg1(sequence: usize, line: &ChargeLine) -> CodecResult<String> {
    let mut codes: Vec<&str> = Vec::with_capacity(line.diagnosis_codes.len());
    for code in &line.diagnosis_codes {
        if !codes.contains(&code.as_str()) {
            codes.push(code.as_str());
        }
    }
    let mut dg1 = Segment::new("DG1");
    dg1.set(1, Field::text(sequence.to_string()))
        .set(2, Field::text("ICD10"))
        .set(3, Field::repetitions(codes))
        .set(6, Field::text("A"));
    dg1.encode()
}
