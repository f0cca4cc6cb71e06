use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use tracing::{info, warn};

use claim_export_service::{Manifest, ManifestEntry};

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{DeliveryOutcome, DeliveryReport, DeliveryStatus, MessageOutcome};

/// Default import endpoint of the receiving billing platform.
pub const DEFAULT_ENDPOINT: &str = "https://api.collaboratemd.com/hl7/hl7Server";

/// Form field the endpoint expects the raw message under.
const MESSAGE_FIELD: &str = "hl7Message";

/// Response snippet length kept in the log.
const SNIPPET_LEN: usize = 200;

/// Run configuration. The cookie is read once per run and immutable for its
/// duration; mid-run expiry surfaces as repeated failed outcomes, not a
/// special code path.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub endpoint: String,
    pub auth_cookie: String,
    /// Mandatory minimum delay between consecutive POSTs.
    pub pacing: Duration,
    pub request_timeout: Duration,
}

impl DeliveryConfig {
    /// Load delivery configuration from environment variables.
    pub fn from_env() -> DeliveryResult<Self> {
        let endpoint =
            std::env::var("CHARGEPOST_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let auth_cookie = std::env::var("CHARGEPOST_AUTH_COOKIE").map_err(|_| {
            DeliveryError::Config(
                "CHARGEPOST_AUTH_COOKIE is not set; supply the billing platform session cookie"
                    .to_string(),
            )
        })?;
        let pacing_ms = std::env::var("CHARGEPOST_PACING_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(1_000);
        let timeout_secs = std::env::var("CHARGEPOST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(30);
        Ok(Self {
            endpoint,
            auth_cookie,
            pacing: Duration::from_millis(pacing_ms),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Sequential, paced replay of a generation manifest. One message at a
/// time; no automatic retry within a run.
pub struct DeliveryOrchestrator {
    config: DeliveryConfig,
    client: reqwest::Client,
}

impl DeliveryOrchestrator {
    pub fn new(config: DeliveryConfig) -> DeliveryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// Deliver every manifest entry in order, appending each attempt and its
    /// outcome to the log at `log_path`. Per-message failures are recorded
    /// as outcomes and never abort the run.
    pub async fn deliver_manifest(
        &self,
        manifest: &Manifest,
        log_path: &Path,
    ) -> DeliveryResult<DeliveryReport> {
        if manifest.entries.is_empty() {
            return Err(DeliveryError::Manifest(
                "manifest contains no messages".to_string(),
            ));
        }

        let mut report = DeliveryReport::default();
        for (index, entry) in manifest.entries.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.pacing).await;
            }
            let outcome = self.deliver_entry(entry, log_path).await?;
            report.outcomes.push(MessageOutcome {
                control_id: entry.control_id.clone(),
                claim_id: entry.claim_id.clone(),
                hl7_file: entry.hl7_file.clone(),
                outcome,
            });
        }

        info!(
            acknowledged = report.acknowledged(),
            negatively_acknowledged = report.negatively_acknowledged(),
            transport_failed = report.transport_failed(),
            not_attempted = report.not_attempted(),
            "delivery run complete"
        );
        Ok(report)
    }

    async fn deliver_entry(
        &self,
        entry: &ManifestEntry,
        log_path: &Path,
    ) -> DeliveryResult<DeliveryOutcome> {
        let file = entry.hl7_file.display().to_string();

        // The stored message is the unit of retry: byte-identical text and
        // control ID on every attempt.
        let raw_text = match fs::read_to_string(&entry.hl7_file) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(file = %file, %error, "stored message unreadable, not attempted");
                let outcome = DeliveryOutcome {
                    status: DeliveryStatus::NotAttempted,
                    http_status: None,
                    response_body: None,
                    timestamp: Utc::now(),
                };
                append_log(
                    log_path,
                    &format!(
                        "[{}] RESULT {} control_id={} outcome={} error={}",
                        Utc::now().to_rfc3339(),
                        file,
                        entry.control_id,
                        outcome.status,
                        error
                    ),
                )?;
                return Ok(outcome);
            }
        };

        // Logged before the POST: an interrupted run leaves an attempt line
        // with no outcome line, which the operator must resolve before
        // trusting a replay.
        append_log(
            log_path,
            &format!(
                "[{}] POST {} control_id={}",
                Utc::now().to_rfc3339(),
                file,
                entry.control_id
            ),
        )?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::COOKIE, &self.config.auth_cookie)
            .form(&[(MESSAGE_FIELD, raw_text.as_str())])
            .send()
            .await;

        let outcome = match response {
            Ok(response) => {
                let http_status = response.status();
                let body = response.text().await.unwrap_or_default();
                let status = classify_response(http_status, &body);
                DeliveryOutcome {
                    status,
                    http_status: Some(http_status.as_u16()),
                    response_body: Some(body),
                    timestamp: Utc::now(),
                }
            }
            Err(error) => {
                warn!(file = %file, %error, "transport failure");
                DeliveryOutcome {
                    status: DeliveryStatus::TransportFailed,
                    http_status: None,
                    response_body: Some(error.to_string()),
                    timestamp: Utc::now(),
                }
            }
        };

        match outcome.status {
            DeliveryStatus::Acknowledged => {
                info!(file = %file, control_id = %entry.control_id, "acknowledged")
            }
            _ => warn!(
                file = %file,
                control_id = %entry.control_id,
                status = %outcome.status,
                "delivery not acknowledged"
            ),
        }

        append_log(
            log_path,
            &format!(
                "[{}] RESULT {} control_id={} outcome={} http={} response={}",
                outcome.timestamp.to_rfc3339(),
                file,
                entry.control_id,
                outcome.status,
                outcome
                    .http_status
                    .map_or_else(|| "-".to_string(), |code| code.to_string()),
                snippet(outcome.response_body.as_deref().unwrap_or_default())
            ),
        )?;

        Ok(outcome)
    }

    /// Equivalent curl invocation for one stored message, for manual
    /// testing against the endpoint.
    pub fn curl_command(&self, hl7_message: &str, control_id: &str) -> String {
        format!(
            "curl -X POST \"{}\" \
             -H \"Content-Type: application/x-www-form-urlencoded\" \
             -H \"Cookie: {}\" \
             --data-urlencode \"{}={}\" # Control ID: {}",
            self.config.endpoint, self.config.auth_cookie, MESSAGE_FIELD, hl7_message, control_id
        )
    }
}

/// Classify a response into a delivery status.
///
/// Negative acknowledgment markers win regardless of HTTP status: a NACK is
/// data-level and must not be retried blindly. A positive marker counts
/// only on a 2xx response; everything else is a transport failure.
fn classify_response(status: StatusCode, body: &str) -> DeliveryStatus {
    if body.contains("MSA|AE") || body.contains("MSA|AR") {
        return DeliveryStatus::NegativelyAcknowledged;
    }
    if status.is_success() {
        if body.contains("MSA|AA") || body.contains("ACK") {
            return DeliveryStatus::Acknowledged;
        }
        if body.to_ascii_lowercase().contains("\"error\"") {
            return DeliveryStatus::NegativelyAcknowledged;
        }
    }
    DeliveryStatus::TransportFailed
}

fn snippet(body: &str) -> String {
    let flattened: String = body
        .chars()
        .map(|ch| if ch == '\r' || ch == '\n' { ' ' } else { ch })
        .collect();
    flattened.chars().take(SNIPPET_LEN).collect()
}

fn append_log(path: &Path, line: &str) -> DeliveryResult<()> {
    let mut log = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(log, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mockito::Matcher;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const RAW_MESSAGE: &str = "MSH|^~\\&|CHARGEPOST|CHARGEPOST|COLLABORATEMD|COLLABORATEMD|20251124093005||DFT^P03|TEST-1|P|2.3.1\rBLG|689.21|||OXFORD\r";

    fn manifest_with_message(dir: &TempDir) -> Manifest {
        let hl7_file = dir.path().join("LEVY_ISABELLA_112425.hl7");
        fs::write(&hl7_file, RAW_MESSAGE).unwrap();
        manifest_for(hl7_file)
    }

    fn manifest_for(hl7_file: PathBuf) -> Manifest {
        Manifest {
            generated_at: Utc::now(),
            entries: vec![ManifestEntry {
                control_id: "TEST-1".to_string(),
                claim_id: "LEVY_ISABELLA_112425".to_string(),
                patient_name: "LEVY, ISABELLA".to_string(),
                date_of_service: NaiveDate::from_ymd_opt(2025, 11, 24).unwrap(),
                total_charge: Decimal::new(68921, 2),
                hl7_file,
                meta_file: PathBuf::from("LEVY_ISABELLA_112425_meta.json"),
            }],
        }
    }

    fn orchestrator(endpoint: String) -> DeliveryOrchestrator {
        DeliveryOrchestrator::new(DeliveryConfig {
            endpoint,
            auth_cookie: "JSESSIONID=abc123".to_string(),
            pacing: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn classification_table() {
        let ok = StatusCode::OK;
        let err = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(
            classify_response(ok, "MSH|...\rMSA|AA|TEST-1\r"),
            DeliveryStatus::Acknowledged
        );
        assert_eq!(
            classify_response(ok, "MSA|AE|TEST-1|invalid CPT"),
            DeliveryStatus::NegativelyAcknowledged
        );
        assert_eq!(
            classify_response(err, "MSA|AR|TEST-1"),
            DeliveryStatus::NegativelyAcknowledged
        );
        assert_eq!(
            classify_response(ok, "{\"error\":\"unknown payer\"}"),
            DeliveryStatus::NegativelyAcknowledged
        );
        assert_eq!(
            classify_response(err, "Internal Server Error"),
            DeliveryStatus::TransportFailed
        );
        // A positive marker on a failed response is not trusted.
        assert_eq!(
            classify_response(err, "ACK"),
            DeliveryStatus::TransportFailed
        );
    }

    #[tokio::test]
    async fn positive_acknowledgment_transitions_to_acknowledged() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hl7/hl7Server")
            .match_header("cookie", "JSESSIONID=abc123")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .with_status(200)
            .with_body("MSH|^~\\&|COLLABORATEMD\rMSA|AA|TEST-1\r")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_with_message(&dir);
        let log_path = dir.path().join("delivery_log.txt");
        let report = orchestrator(format!("{}/hl7/hl7Server", server.url()))
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.acknowledged(), 1);
        assert!(report.is_clean());
        let outcome = &report.outcomes[0].outcome;
        assert_eq!(outcome.http_status, Some(200));
        assert!(outcome.response_body.as_deref().unwrap().contains("MSA|AA"));
    }

    #[tokio::test]
    async fn negative_acknowledgment_is_recorded_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hl7/hl7Server")
            .with_status(200)
            .with_body("MSA|AE|TEST-1|unknown procedure code")
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_with_message(&dir);
        let log_path = dir.path().join("delivery_log.txt");
        let report = orchestrator(format!("{}/hl7/hl7Server", server.url()))
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.negatively_acknowledged(), 1);
        assert!(!report.is_clean());
        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("outcome=negatively_acknowledged"));
        assert!(log.contains("unknown procedure code"));
    }

    #[tokio::test]
    async fn http_500_without_acknowledgment_is_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hl7/hl7Server")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_with_message(&dir);
        let log_path = dir.path().join("delivery_log.txt");
        let report = orchestrator(format!("{}/hl7/hl7Server", server.url()))
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        assert_eq!(report.transport_failed(), 1);
        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("outcome=transport_failed"));
        assert!(log.contains("http=500"));
    }

    #[tokio::test]
    async fn retry_transmits_byte_identical_message_and_control_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hl7/hl7Server")
            .match_body(Matcher::UrlEncoded(
                "hl7Message".to_string(),
                RAW_MESSAGE.to_string(),
            ))
            .with_status(200)
            .with_body("MSA|AA|TEST-1")
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_with_message(&dir);
        let log_path = dir.path().join("delivery_log.txt");
        let orchestrator = orchestrator(format!("{}/hl7/hl7Server", server.url()));

        let first = orchestrator
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();
        let second = orchestrator
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        // Both POSTs matched the exact same body and control id.
        mock.assert_async().await;
        assert_eq!(first.outcomes[0].control_id, second.outcomes[0].control_id);
    }

    #[tokio::test]
    async fn unreadable_message_is_not_attempted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hl7/hl7Server")
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_for(dir.path().join("MISSING.hl7"));
        let log_path = dir.path().join("delivery_log.txt");
        let report = orchestrator(format!("{}/hl7/hl7Server", server.url()))
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.not_attempted(), 1);
    }

    #[tokio::test]
    async fn log_records_attempt_before_outcome() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hl7/hl7Server")
            .with_status(200)
            .with_body("MSA|AA|TEST-1")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manifest = manifest_with_message(&dir);
        let log_path = dir.path().join("delivery_log.txt");
        orchestrator(format!("{}/hl7/hl7Server", server.url()))
            .deliver_manifest(&manifest, &log_path)
            .await
            .unwrap();

        let log = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("POST"));
        assert!(lines[0].contains("control_id=TEST-1"));
        assert!(lines[1].contains("RESULT"));
        assert!(lines[1].contains("outcome=acknowledged"));
    }

    #[test]
    fn config_from_env_defaults() {
        std::env::set_var("CHARGEPOST_AUTH_COOKIE", "JSESSIONID=abc123");
        std::env::remove_var("CHARGEPOST_ENDPOINT");
        std::env::remove_var("CHARGEPOST_PACING_MS");
        let config = DeliveryConfig::from_env().unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.pacing, Duration::from_millis(1_000));
        std::env::remove_var("CHARGEPOST_AUTH_COOKIE");
    }

    #[test]
    fn curl_command_carries_payload_and_cookie() {
        let orchestrator = orchestrator(DEFAULT_ENDPOINT.to_string());
        let command = orchestrator.curl_command("MSH|^~\\&|...", "TEST-9");
        assert!(command.contains(DEFAULT_ENDPOINT));
        assert!(command.contains("Cookie: JSESSIONID=abc123"));
        assert!(command.contains("hl7Message=MSH|"));
        assert!(command.contains("# Control ID: TEST-9"));
    }
}
