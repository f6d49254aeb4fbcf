//! Request encoding and response decoding for the upload endpoint.
//!
//! # Request Format
//!
//! A request is a `multipart/form-data` body. The first part, `manifest`,
//! is a JSON document describing every record of the batch. It is followed
//! by one binary part per attachment:
//!
//! ```text
//! manifest                                  application/json
//! record.0.attachment.0                     image/png          graph.png
//! record.0.attachment.1                     x-snippet-...      snippet.py
//! record.0.achievement.attachment.0         text/plain         output.log
//! record.1.attachment.0                     ...
//! ```
//!
//! Records appear in batch order. Within a record, test-level attachments
//! precede achievement-level ones, each in insertion order. The manifest
//! references every binary part by name so the service can reassociate it
//! with its owner:
//!
//! ```json
//! {
//!   "records": [{
//!     "id": "6f1c...",
//!     "submitter": "anonymous",
//!     "title": "t1",
//!     "categories": ["team:foo"],
//!     "description": { "format": "plain", "text": "..." },
//!     "tags": ["foo"],
//!     "attachments": [{ "part": "record.0.attachment.0", "name": "graph.png",
//!                       "kind": "image/png", "tags": [], "size": 1234,
//!                       "sha256": "..." }],
//!     "achievement": { "result": "passed", "test-date": "2024-01-01T00:00:00Z",
//!                      "tags": [], "attachments": [] }
//!   }]
//! }
//! ```
//!
//! # Response Format
//!
//! ```json
//! { "records": [ { "id": "6f1c...", "status": "accepted" },
//!                { "id": "9a2b...", "status": "rejected", "reason": "..." } ] }
//! ```
//!
//! A record of the batch that the response does not mention is treated as
//! rejected: acknowledgment is never assumed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{EncodedRequest, Part, RawResponse, TransportError, TransportResult};
use crate::model::{AchievementResult, AttachmentStore, LocalId, TestRecord};

/// Name of the JSON part describing the batch.
pub const MANIFEST_PART: &str = "manifest";

/// Reason recorded for records missing from an otherwise valid response.
pub const NOT_ACKNOWLEDGED: &str = "not acknowledged by service";

/// Per-record verdict decoded from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The service stored the record.
    Acknowledged,
    /// The service refused the record for the given reason.
    Rejected(String),
}

/// Converts record batches to requests and responses to outcomes.
///
/// Implementations must be deterministic: the same records always produce
/// the same request.
pub trait Codec: Send + Sync {
    /// Encodes a batch of complete records into one request.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Encode` if a record cannot be represented,
    /// e.g. because it is incomplete.
    fn encode(&self, records: &[&TestRecord]) -> TransportResult<EncodedRequest>;

    /// Decodes the service's answer to a request carrying `sent`.
    ///
    /// The returned map has exactly one entry per identifier in `sent`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Status` - non-success HTTP status
    /// - `TransportError::MalformedResponse` - body does not match the schema
    fn decode(
        &self,
        sent: &[LocalId],
        response: &RawResponse,
    ) -> TransportResult<BTreeMap<LocalId, RecordOutcome>>;
}

/// The default codec: JSON manifest plus one binary part per attachment.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultipartCodec;

#[derive(Serialize)]
struct Manifest<'a> {
    records: Vec<ManifestRecord<'a>>,
}

#[derive(Serialize)]
struct ManifestRecord<'a> {
    id: LocalId,
    submitter: &'a str,
    title: &'a str,
    categories: &'a [String],
    description: Option<ManifestDescription<'a>>,
    tags: &'a [String],
    attachments: Vec<ManifestAttachment<'a>>,
    achievement: ManifestAchievement<'a>,
}

#[derive(Serialize)]
struct ManifestDescription<'a> {
    format: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
struct ManifestAchievement<'a> {
    result: AchievementResult,
    #[serde(rename = "test-date")]
    test_date: String,
    tags: &'a [String],
    attachments: Vec<ManifestAttachment<'a>>,
}

#[derive(Serialize)]
struct ManifestAttachment<'a> {
    part: String,
    name: &'a str,
    kind: &'a str,
    tags: &'a [String],
    size: usize,
    sha256: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    records: Vec<RecordStatus>,
}

#[derive(Deserialize)]
struct RecordStatus {
    id: LocalId,
    status: Status,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Accepted,
    Rejected,
}

impl Codec for MultipartCodec {
    fn encode(&self, records: &[&TestRecord]) -> TransportResult<EncodedRequest> {
        let mut files = Vec::new();
        let mut manifest = Manifest {
            records: Vec::with_capacity(records.len()),
        };

        for (index, record) in records.iter().enumerate() {
            record
                .validate()
                .map_err(|e| TransportError::Encode(e.to_string()))?;
            // validate() guarantees the required fields below
            let result = record
                .achievement
                .result
                .ok_or_else(|| TransportError::Encode(format!("record {} has no result", record.id())))?;

            let attachments = collect_parts(
                &record.attachment,
                &format!("record.{}.attachment", index),
                &mut files,
            );
            let achievement_attachments = collect_parts(
                &record.achievement.attachment,
                &format!("record.{}.achievement.attachment", index),
                &mut files,
            );

            manifest.records.push(ManifestRecord {
                id: record.id(),
                submitter: record.submitter().unwrap_or_default(),
                title: record.title().unwrap_or_default(),
                categories: record.categories(),
                description: record.description().map(|d| ManifestDescription {
                    format: d.format(),
                    text: d.text(),
                }),
                tags: record.attachment.tags(),
                attachments,
                achievement: ManifestAchievement {
                    result,
                    test_date: record.achievement.test_date.to_rfc3339(),
                    tags: record.achievement.attachment.tags(),
                    attachments: achievement_attachments,
                },
            });
        }

        let manifest =
            serde_json::to_string(&manifest).map_err(|e| TransportError::Encode(e.to_string()))?;

        let mut parts = Vec::with_capacity(files.len() + 1);
        parts.push(Part::Text {
            name: MANIFEST_PART.to_string(),
            value: manifest,
            content_type: "application/json".to_string(),
        });
        parts.extend(files);

        Ok(EncodedRequest {
            record_ids: records.iter().map(|r| r.id()).collect(),
            parts,
        })
    }

    fn decode(
        &self,
        sent: &[LocalId],
        response: &RawResponse,
    ) -> TransportResult<BTreeMap<LocalId, RecordOutcome>> {
        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let parsed: UploadResponse = serde_json::from_slice(&response.body)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

        let mut outcomes: BTreeMap<LocalId, RecordOutcome> = sent
            .iter()
            .map(|id| (*id, RecordOutcome::Rejected(NOT_ACKNOWLEDGED.to_string())))
            .collect();

        for entry in parsed.records {
            let Some(slot) = outcomes.get_mut(&entry.id) else {
                warn!("Service reported unknown record {}, ignoring", entry.id);
                continue;
            };
            *slot = match entry.status {
                Status::Accepted => RecordOutcome::Acknowledged,
                Status::Rejected => RecordOutcome::Rejected(
                    entry.reason.unwrap_or_else(|| "rejected by service".to_string()),
                ),
            };
        }

        Ok(outcomes)
    }
}

/// Describes each attachment of `store` and queues its binary part.
fn collect_parts<'a>(
    store: &'a AttachmentStore,
    prefix: &str,
    files: &mut Vec<Part>,
) -> Vec<ManifestAttachment<'a>> {
    store
        .iter()
        .enumerate()
        .map(|(i, attachment)| {
            let part = format!("{}.{}", prefix, i);
            files.push(Part::File {
                name: part.clone(),
                file_name: attachment.name.clone(),
                kind: attachment.kind.clone(),
                content: attachment.content.clone(),
            });
            ManifestAttachment {
                part,
                name: &attachment.name,
                kind: &attachment.kind,
                tags: &attachment.tags,
                size: attachment.size(),
                sha256: attachment.sha256(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attachment;

    fn record(title: &str, result: AchievementResult) -> TestRecord {
        let mut t = TestRecord::new();
        t.submitter_set("anonymous");
        t.title_set(title);
        t.categories_set(["team:foo"]).unwrap();
        t.achievement.result = Some(result);
        t
    }

    fn manifest_of(request: &EncodedRequest) -> serde_json::Value {
        match &request.parts[0] {
            Part::Text { name, value, .. } => {
                assert_eq!(name, MANIFEST_PART);
                serde_json::from_str(value).unwrap()
            }
            other => panic!("first part is not the manifest: {:?}", other),
        }
    }

    fn ok_response(body: serde_json::Value) -> RawResponse {
        RawResponse {
            status: 200,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn test_encode_full_field_set() {
        let mut t = record("t1", AchievementResult::Passed);
        t.description_plain_set("Simple Description");
        t.attachment.tags_add(["foo", "bar"]);

        let request = MultipartCodec.encode(&[&t]).unwrap();
        let manifest = manifest_of(&request);
        let entry = &manifest["records"][0];

        assert_eq!(request.record_ids, vec![t.id()]);
        assert_eq!(entry["id"], t.id().to_string());
        assert_eq!(entry["submitter"], "anonymous");
        assert_eq!(entry["title"], "t1");
        assert_eq!(entry["categories"], serde_json::json!(["team:foo"]));
        assert_eq!(entry["description"]["format"], "plain");
        assert_eq!(entry["description"]["text"], "Simple Description");
        assert_eq!(entry["tags"], serde_json::json!(["foo", "bar"]));
        assert_eq!(entry["achievement"]["result"], "passed");
        assert!(entry["achievement"]["test-date"].is_string());
    }

    #[test]
    fn test_encode_absent_description_is_null() {
        let t = record("t1", AchievementResult::Failed);
        let manifest = manifest_of(&MultipartCodec.encode(&[&t]).unwrap());
        assert!(manifest["records"][0]["description"].is_null());
    }

    #[test]
    fn test_encode_preserves_attachment_order() {
        let mut t = record("snippets", AchievementResult::Nonapplicable);
        for i in 0..10 {
            t.attachment.push(Attachment::new(
                "snippet.py",
                format!("s{}", i).into_bytes(),
                "x-snippet-python3-matplot-png",
            ));
        }
        t.achievement
            .attachment
            .data_add("out.log", b"log".to_vec(), "text/plain");

        let request = MultipartCodec.encode(&[&t]).unwrap();

        let names: Vec<&str> = request.parts.iter().map(Part::name).collect();
        let mut expected = vec![MANIFEST_PART.to_string()];
        expected.extend((0..10).map(|i| format!("record.0.attachment.{}", i)));
        expected.push("record.0.achievement.attachment.0".to_string());
        assert_eq!(names, expected);

        for i in 0..10 {
            match &request.parts[i + 1] {
                Part::File { content, kind, .. } => {
                    assert_eq!(content, &format!("s{}", i).into_bytes());
                    assert_eq!(kind, "x-snippet-python3-matplot-png");
                }
                other => panic!("expected file part, got {:?}", other),
            }
        }

        let manifest = manifest_of(&request);
        let described = manifest["records"][0]["attachments"].as_array().unwrap();
        assert_eq!(described.len(), 10);
        assert_eq!(described[3]["part"], "record.0.attachment.3");
        assert_eq!(
            manifest["records"][0]["achievement"]["attachments"][0]["part"],
            "record.0.achievement.attachment.0"
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let mut a = record("a", AchievementResult::Passed);
        a.attachment.data_add("x.bin", vec![0, 1, 2], "application/octet-stream");
        let b = record("b", AchievementResult::Failed);

        let first = MultipartCodec.encode(&[&a, &b]).unwrap();
        let second = MultipartCodec.encode(&[&a, &b]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_rejects_incomplete_record() {
        let t = TestRecord::new();
        let err = MultipartCodec.encode(&[&t]).unwrap_err();
        assert!(matches!(err, TransportError::Encode(_)));
    }

    #[test]
    fn test_decode_mixed_outcomes() {
        let ids: Vec<LocalId> = (0..3).map(|_| LocalId::generate()).collect();
        let response = ok_response(serde_json::json!({
            "records": [
                { "id": ids[0], "status": "accepted" },
                { "id": ids[1], "status": "rejected", "reason": "duplicate anchor" },
                { "id": ids[2], "status": "accepted" },
            ]
        }));

        let outcomes = MultipartCodec.decode(&ids, &response).unwrap();

        assert_eq!(outcomes[&ids[0]], RecordOutcome::Acknowledged);
        assert_eq!(
            outcomes[&ids[1]],
            RecordOutcome::Rejected("duplicate anchor".into())
        );
        assert_eq!(outcomes[&ids[2]], RecordOutcome::Acknowledged);
    }

    #[test]
    fn test_decode_missing_record_is_not_acknowledged() {
        let ids = vec![LocalId::generate(), LocalId::generate()];
        let stranger = LocalId::generate();
        let response = ok_response(serde_json::json!({
            "records": [
                { "id": ids[0], "status": "accepted" },
                { "id": stranger, "status": "accepted" },
            ]
        }));

        let outcomes = MultipartCodec.decode(&ids, &response).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[&ids[1]],
            RecordOutcome::Rejected(NOT_ACKNOWLEDGED.into())
        );
    }

    #[test]
    fn test_decode_error_status() {
        let response = RawResponse {
            status: 503,
            body: b"maintenance".to_vec(),
        };
        let err = MultipartCodec
            .decode(&[LocalId::generate()], &response)
            .unwrap_err();

        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                body: "maintenance".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_malformed_body() {
        let response = RawResponse {
            status: 200,
            body: b"<html>ok</html>".to_vec(),
        };
        let err = MultipartCodec
            .decode(&[LocalId::generate()], &response)
            .unwrap_err();

        assert!(matches!(err, TransportError::MalformedResponse(_)));
        assert!(!err.is_retryable());
    }
}
