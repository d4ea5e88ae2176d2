//! Error classification helpers
//!
//! Pure functions over a [`FaultError`] chain. Chain traversal goes through
//! [`FaultError::cause`] so every branch is visible to the compiler.

use std::fmt::Display;

use super::structured::{Details, StructuredError};
use super::taxonomy::{INTERNAL_SERVER_ERROR, VALIDATION_ERROR};
use super::types::FaultError;

/// Convert a validation collection found anywhere in `err`'s chain into a
/// field → message map. Any other error is wrapped in an internal error.
pub fn extract_validation_details(err: FaultError) -> Result<Details, FaultError> {
    if let Some(details) = find_validation_details(&err) {
        return Ok(details);
    }
    Err(INTERNAL_SERVER_ERROR.wrap(err).into())
}

fn find_validation_details(err: &FaultError) -> Option<Details> {
    err.chain().find_map(|node| match node {
        FaultError::Validation(errors) => Some(validation_details(errors)),
        _ => None,
    })
}

pub(crate) fn validation_details(errors: &validator::ValidationErrors) -> Details {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, field_errors)| {
            let message = field_errors
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => e.code.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            (field.to_string(), message)
        })
        .collect()
}

/// The formatted trace of the deepest node that carries one, or an empty
/// string when no node does.
pub fn deepest_trace(err: &FaultError) -> String {
    let mut deepest = None;
    for node in err.chain() {
        if let Some(trace) = node.trace() {
            deepest = Some(trace);
        }
    }
    deepest.map(|trace| format!("{}\n", trace)).unwrap_or_default()
}

/// Case-insensitive, whitespace-trimmed substring test against each candidate.
pub fn contains_message<E: Display + ?Sized>(err: &E, candidates: &[&str]) -> bool {
    let haystack = err.to_string().trim().to_lowercase();
    candidates
        .iter()
        .any(|candidate| haystack.contains(&candidate.trim().to_lowercase()))
}

/// The innermost structured error in the chain.
pub fn as_structured(err: &FaultError) -> Option<&StructuredError> {
    err.chain()
        .filter_map(|node| match node {
            FaultError::Structured(structured) => Some(structured.as_ref()),
            _ => None,
        })
        .last()
}

/// Whether any node in the chain is a structured error.
pub fn is_structured(err: &FaultError) -> bool {
    err.chain()
        .any(|node| matches!(node, FaultError::Structured(_)))
}

/// The structured form of `err`: the innermost structured error when present,
/// a validation error built from a validation collection, or a generic
/// internal error otherwise.
pub fn classify(err: &FaultError) -> StructuredError {
    if let Some(structured) = as_structured(err) {
        return structured.clone();
    }
    if let Some(details) = find_validation_details(err) {
        return VALIDATION_ERROR.error_with(VALIDATION_ERROR.message, details);
    }
    INTERNAL_SERVER_ERROR.error()
}

/// Driver errors that signal a duplicate key.
pub fn is_unique_violation<E: Display + ?Sized>(err: &E) -> bool {
    contains_message(err, &["duplicate key value", "unique constraint", "already exists"])
}

/// Driver errors that signal an unreachable peer.
pub fn is_connection_refused<E: Display + ?Sized>(err: &E) -> bool {
    contains_message(err, &["connection refused", "connection reset", "broken pipe"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Trace, NOT_FOUND};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use validator::Validate;

    #[derive(Validate)]
    struct SignUp {
        #[validate(email(message = "must be a valid email"))]
        email: String,
        #[validate(length(min = 8))]
        password: String,
    }

    fn plain(msg: &str) -> FaultError {
        FaultError::Other {
            source: msg.to_string().into(),
            trace: None,
        }
    }

    fn wrap(inner: FaultError, context: &str, trace: Option<Trace>) -> FaultError {
        FaultError::Context {
            context: context.to_string(),
            source: Box::new(inner),
            trace,
        }
    }

    #[rstest]
    #[case("Disk Full on /dev/sda", &["disk full"], true)]
    #[case("  DISK FULL  ", &["  disk full "], true)]
    #[case("permission denied", &["disk full", "denied"], true)]
    #[case("permission denied", &["disk full"], false)]
    #[case("anything", &[], false)]
    fn contains_message_cases(#[case] text: &str, #[case] candidates: &[&str], #[case] expected: bool) {
        assert_eq!(contains_message(&plain(text), candidates), expected);
    }

    #[test]
    fn validation_details_are_extracted_through_context() {
        let form = SignUp {
            email: "nope".into(),
            password: "short".into(),
        };
        let err: FaultError = form.validate().unwrap_err().into();
        let err = wrap(err, "signing up", None);

        let details = extract_validation_details(err).expect("validation details");
        assert_eq!(details.get("email").map(String::as_str), Some("must be a valid email"));
        assert_eq!(details.get("password").map(String::as_str), Some("length"));
    }

    #[test]
    fn non_validation_error_becomes_internal() {
        let err = extract_validation_details(plain("boom")).unwrap_err();
        let structured = as_structured(&err).expect("internal error");
        assert!(INTERNAL_SERVER_ERROR.is(structured));
        assert_eq!(structured.cause().map(|c| c.to_string()), Some("boom".to_string()));
    }

    #[test]
    fn deepest_trace_is_empty_without_traces() {
        let err = wrap(wrap(plain("root"), "a", None), "b", None);
        assert_eq!(deepest_trace(&err), "");
    }

    #[test]
    fn deepest_trace_finds_the_only_trace_at_any_depth() {
        for depth in 1..6 {
            for position in 0..depth {
                let trace = Trace::force_capture();
                let mut err = if position == 0 {
                    FaultError::Other {
                        source: "root".into(),
                        trace: Some(trace.clone()),
                    }
                } else {
                    plain("root")
                };
                for level in 1..depth {
                    let node_trace = (level == position).then(|| trace.clone());
                    err = wrap(err, "layer", node_trace);
                }
                assert_eq!(deepest_trace(&err), format!("{}\n", trace));
            }
        }
    }

    #[test]
    fn deepest_trace_prefers_the_innermost_trace() {
        let inner = Trace::force_capture();
        let outer = Trace::force_capture();
        let err = wrap(
            FaultError::Other {
                source: "root".into(),
                trace: Some(inner.clone()),
            },
            "outer",
            Some(outer),
        );
        assert_eq!(deepest_trace(&err), format!("{}\n", inner));
    }

    #[test]
    fn innermost_structured_error_wins() {
        let not_found = NOT_FOUND.error_with("order missing", Details::new());
        let err: FaultError = INTERNAL_SERVER_ERROR.wrap(not_found.into()).into();
        let err = wrap(err, "loading order", None);

        assert!(is_structured(&err));
        let found = as_structured(&err).unwrap();
        assert_eq!(found.title(), "not_found");
        assert_eq!(classify(&err).code(), 4040);
    }

    #[test]
    fn classify_falls_back_to_internal() {
        let err = plain("socket closed");
        assert!(!is_structured(&err));
        assert!(INTERNAL_SERVER_ERROR.is(&classify(&err)));
    }

    #[test]
    fn driver_heuristics() {
        let dup = plain("ERROR: duplicate key value violates unique constraint \"users_email_key\"");
        assert!(is_unique_violation(&dup));
        assert!(!is_connection_refused(&dup));
        assert!(is_connection_refused(&plain("Connection refused (os error 111)")));
    }

    proptest::proptest! {
        #[test]
        fn contains_message_ignores_case_and_padding(
            prefix in "[a-z ]{0,10}",
            suffix in "[a-z ]{0,10}",
            upper in proptest::bool::ANY,
            pad in " {0,3}",
        ) {
            let needle = if upper { "DISK FULL" } else { "disk full" };
            let text = format!("{pad}{prefix}{needle}{suffix}{pad}");
            proptest::prop_assert!(contains_message(&plain(&text), &["disk full"]));
        }
    }
}
