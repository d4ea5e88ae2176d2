//! Structured error encoding over the gRPC status channel
//!
//! A [`StructuredError`] is sent as a status whose code and message mirror the
//! error, with an [`ErrorDetail`] record packed into the status details. The
//! details use the `google.rpc.Status` layout, so any gRPC stack that reads
//! `grpc-status-details-bin` can unpack the record without extra metadata.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use prost::Message;
use std::collections::HashMap;
use tonic::{Code, Status};

use crate::error::{classify, is_structured, FaultError, StructuredError};

/// Type URL identifying the structured error detail record.
pub const ERROR_DETAIL_TYPE_URL: &str = "type.googleapis.com/shared.error.v1.CustomError";

/// Message returned to callers when a failure has no structured form.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// The detail record attached to an encoded status.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorDetail {
    #[prost(string, tag = "1")]
    pub title: String,
    #[prost(int64, tag = "2")]
    pub code: i64,
    #[prost(string, tag = "3")]
    pub msg: String,
    #[prost(map = "string, string", tag = "4")]
    pub details: HashMap<String, String>,
    #[prost(string, tag = "5")]
    pub timestamp: String,
}

/// `google.rpc.Status`
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

/// `google.protobuf.Any`
#[derive(Clone, PartialEq, Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl From<&StructuredError> for ErrorDetail {
    fn from(err: &StructuredError) -> Self {
        ErrorDetail {
            title: err.title().to_string(),
            code: err.code(),
            msg: err.message().to_string(),
            details: err.details().clone(),
            timestamp: err.timestamp().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Encode `err` as a status carrying its detail record.
pub fn encode(err: &StructuredError) -> Status {
    let detail = ErrorDetail::from(err);
    let envelope = RpcStatus {
        code: err.status() as i32,
        message: err.message().to_string(),
        details: vec![Any {
            type_url: ERROR_DETAIL_TYPE_URL.to_string(),
            value: detail.encode_to_vec(),
        }],
    };
    Status::with_details(
        err.status(),
        err.message(),
        Bytes::from(envelope.encode_to_vec()),
    )
}

/// Rebuild the structured error carried by `status`, if any.
///
/// The status code comes from the envelope rather than the record so that a
/// code rewritten by an intermediary wins. A malformed timestamp decodes as
/// the Unix epoch instead of failing.
pub fn decode(status: &Status) -> Option<StructuredError> {
    let raw = status.details();
    if raw.is_empty() {
        return None;
    }
    let envelope = match RpcStatus::decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "status details are not a google.rpc.Status");
            return None;
        }
    };

    envelope
        .details
        .iter()
        .filter(|any| any.type_url == ERROR_DETAIL_TYPE_URL)
        .find_map(|any| ErrorDetail::decode(any.value.as_slice()).ok())
        .map(|detail| {
            let timestamp = DateTime::parse_from_rfc3339(&detail.timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default();
            let mut err = StructuredError::new(
                status.code(),
                detail.code,
                detail.title,
                detail.msg,
                detail.details,
            );
            err.set_timestamp(timestamp);
            err
        })
}

/// The structured error a remote call failed with, if any.
///
/// Statuses converted with `FaultError::from` are already decoded into a
/// `Structured` node; raw `Rpc` nodes are decoded here. The first match in
/// the chain wins.
pub fn decode_error(err: &FaultError) -> Option<StructuredError> {
    err.chain().find_map(|node| match node {
        FaultError::Structured(structured) => Some(structured.as_ref().clone()),
        FaultError::Rpc(status) => decode(status),
        _ => None,
    })
}

/// Whether `err` carries a structured error anywhere in its chain.
pub fn is_structured_error(err: &FaultError) -> bool {
    is_structured(err)
}

/// The status a server returns for `err`.
///
/// Structured errors and validation failures are encoded with their detail
/// record, including one carried by a downstream status. Anything else,
/// a plain downstream status included, becomes a bare `Internal` status.
pub fn to_status(err: &FaultError) -> Status {
    let has_validation = err
        .chain()
        .any(|node| matches!(node, FaultError::Validation(_)));
    if is_structured(err) || has_validation {
        return encode(&classify(err));
    }
    match decode_error(err) {
        Some(remote) => encode(&remote),
        None => Status::new(Code::Internal, GENERIC_INTERNAL_MESSAGE),
    }
}

impl From<StructuredError> for Status {
    fn from(err: StructuredError) -> Self {
        encode(&err)
    }
}

impl From<FaultError> for Status {
    fn from(err: FaultError) -> Self {
        to_status(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Details, NOT_FOUND, VALIDATION_ERROR};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sample() -> StructuredError {
        let mut err = VALIDATION_ERROR
            .error_with("email is required", Details::new())
            .with_detail("email", "required");
        err.set_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        err
    }

    #[test]
    fn round_trip_preserves_fields() {
        let original = sample();
        let status = encode(&original);
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "email is required");

        let decoded = decode(&status).expect("structured error");
        assert_eq!(decoded, original);
        assert_eq!(decoded.code(), 4001);
        assert_eq!(decoded.title(), "validation_failed");
    }

    #[test]
    fn timestamp_is_rfc3339_on_the_wire() {
        let detail = ErrorDetail::from(&sample());
        assert_eq!(detail.timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn status_code_comes_from_the_envelope() {
        let status = encode(&sample());
        let rewritten = Status::with_details(
            Code::Unavailable,
            status.message(),
            Bytes::copy_from_slice(status.details()),
        );
        let decoded = decode(&rewritten).unwrap();
        assert_eq!(decoded.status(), Code::Unavailable);
        assert_eq!(decoded.code(), 4001);
    }

    #[test]
    fn malformed_timestamp_decodes_to_epoch() {
        let detail = ErrorDetail {
            title: "not_found".into(),
            code: 4040,
            msg: "gone".into(),
            details: HashMap::new(),
            timestamp: "yesterday".into(),
        };
        let envelope = RpcStatus {
            code: Code::NotFound as i32,
            message: "gone".into(),
            details: vec![Any {
                type_url: ERROR_DETAIL_TYPE_URL.into(),
                value: detail.encode_to_vec(),
            }],
        };
        let status = Status::with_details(Code::NotFound, "gone", envelope.encode_to_vec().into());

        let decoded = decode(&status).unwrap();
        assert_eq!(decoded.timestamp(), DateTime::<Utc>::default());
        assert_eq!(decoded.message(), "gone");
    }

    #[test]
    fn plain_status_has_no_structured_error() {
        assert!(decode(&Status::deadline_exceeded("slow")).is_none());
        let garbage = Status::with_details(Code::Internal, "x", Bytes::from_static(b"\xff\xff"));
        assert!(decode(&garbage).is_none());
        let foreign = RpcStatus {
            code: Code::Internal as i32,
            message: "x".into(),
            details: vec![Any {
                type_url: "type.googleapis.com/google.rpc.DebugInfo".into(),
                value: vec![],
            }],
        };
        let status = Status::with_details(Code::Internal, "x", foreign.encode_to_vec().into());
        assert!(decode(&status).is_none());
    }

    #[test]
    fn to_status_hides_unstructured_failures() {
        let err = FaultError::resource("database", "password authentication failed");
        let status = to_status(&err);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), GENERIC_INTERNAL_MESSAGE);
        assert!(status.details().is_empty());
    }

    #[test]
    fn to_status_encodes_wrapped_structured_errors() {
        let err = FaultError::from(NOT_FOUND.error()).context("loading user");
        let status = to_status(&err);
        assert_eq!(status.code(), Code::NotFound);
        assert!(is_structured_error(&FaultError::from(status)));
    }

    #[test]
    fn decode_error_finds_remote_status_in_chain() {
        let remote = FaultError::Rpc(encode(&sample())).context("calling accounts");
        let decoded = decode_error(&remote).unwrap();
        assert_eq!(decoded.title(), "validation_failed");
        assert!(decode_error(&FaultError::Rpc(Status::cancelled("bye"))).is_none());
    }

    #[test]
    fn decode_error_reads_converted_client_errors() {
        let client_err = FaultError::from(encode(&sample()));
        assert!(matches!(client_err, FaultError::Structured(_)));

        let decoded = decode_error(&client_err).unwrap();
        assert_eq!(decoded, sample());

        let wrapped = client_err.context("creating account");
        assert_eq!(decode_error(&wrapped).unwrap().code(), 4001);
    }

    #[test]
    fn to_status_hides_plain_downstream_status() {
        let leaked = "relation \"users_secret\" does not exist";
        for err in [
            FaultError::Rpc(Status::not_found(leaked)),
            FaultError::Rpc(Status::not_found(leaked)).context("loading user"),
        ] {
            let status = to_status(&err);
            assert_eq!(status.code(), Code::Internal);
            assert_eq!(status.message(), GENERIC_INTERNAL_MESSAGE);
            assert!(status.details().is_empty());
        }
    }

    #[test]
    fn to_status_forwards_structured_downstream_status() {
        let status = to_status(&FaultError::Rpc(encode(&sample())));
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(decode(&status).unwrap().code(), 4001);
    }
}
