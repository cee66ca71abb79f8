//! Change events decoded from store notifications.

use serde::{Deserialize, Serialize};

use crate::{ConsoleChunk, Error, JobId, JobOp, JobSnapshot, Result};

/// Which notification feed an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    JobUpdate,
    ConsoleUpdate,
}

/// Typed payload of a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangePayload {
    Job { op: JobOp, job: JobSnapshot },
    Console(ConsoleChunk),
    /// A stored chunk announced by id only; its text has to be read back.
    ConsoleRow { id: i64, job_id: JobId },
}

/// A single row-level change, keyed by the job it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity_id: JobId,
    pub payload: ChangePayload,
}

#[derive(Deserialize)]
struct JobNotification {
    op: JobOp,
    job: JobSnapshot,
}

#[derive(Deserialize)]
struct ConsoleNotification {
    id: i64,
    job_id: JobId,
    data: Option<String>,
}

impl ChangeEvent {
    /// Decode a raw notification payload received on a feed of `kind`.
    pub fn decode(kind: ChangeKind, raw: &str) -> Result<Self> {
        let decode_err = |e: serde_json::Error| Error::Decode {
            channel: format!("{kind:?}"),
            message: e.to_string(),
        };

        match kind {
            ChangeKind::JobUpdate => {
                let JobNotification { op, job } = serde_json::from_str(raw).map_err(decode_err)?;
                Ok(Self {
                    kind,
                    entity_id: job.id,
                    payload: ChangePayload::Job { op, job },
                })
            }
            ChangeKind::ConsoleUpdate => {
                let ConsoleNotification { id, job_id, data } =
                    serde_json::from_str(raw).map_err(decode_err)?;
                let payload = match data {
                    Some(data) => ChangePayload::Console(ConsoleChunk { id, job_id, data }),
                    None => ChangePayload::ConsoleRow { id, job_id },
                };
                Ok(Self {
                    kind,
                    entity_id: job_id,
                    payload,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobState;
    use crate::job::tests::sample_job;

    #[test]
    fn test_decode_console_chunk() {
        let event = ChangeEvent::decode(
            ChangeKind::ConsoleUpdate,
            r#"{"id": 17, "job_id": 3, "data": "12:00:01|hello\n"}"#,
        )
        .unwrap();

        assert_eq!(event.entity_id, JobId::new(3));
        match event.payload {
            ChangePayload::Console(chunk) => {
                assert_eq!(chunk.id, 17);
                assert_eq!(chunk.data, "12:00:01|hello\n");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_decode_console_without_text() {
        let event =
            ChangeEvent::decode(ChangeKind::ConsoleUpdate, r#"{"id": 5, "job_id": 3}"#).unwrap();

        assert_eq!(event.entity_id, JobId::new(3));
        assert_eq!(
            event.payload,
            ChangePayload::ConsoleRow {
                id: 5,
                job_id: JobId::new(3)
            }
        );
    }

    #[test]
    fn test_decode_job_notification() {
        let job = sample_job(11, JobState::Running);
        let raw = serde_json::json!({ "op": "UPDATE", "job": job }).to_string();

        let event = ChangeEvent::decode(ChangeKind::JobUpdate, &raw).unwrap();
        assert_eq!(event.kind, ChangeKind::JobUpdate);
        assert_eq!(event.entity_id, JobId::new(11));
        assert_eq!(
            event.payload,
            ChangePayload::Job {
                op: JobOp::Update,
                job
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = ChangeEvent::decode(ChangeKind::ConsoleUpdate, "{not json").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
