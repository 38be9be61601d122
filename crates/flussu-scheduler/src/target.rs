//! Call target resolution and timed-call URI construction.
//!
//! The workflow engine is addressed either through an existing session or by
//! starting a workflow fresh. Which one applies is decided by [`TargetPolicy`].

pub use flussu_core::TargetPolicy;

use crate::record::WorkRecord;

/// Result string for records that carry no usable reference.
pub const MISSING_TARGET: &str = "ERROR:[0]:Missing workflow or session reference";

/// Where a record's call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Resume an existing conversation.
    Session {
        session_ref: String,
        block_ref: Option<String>,
    },
    /// Start a workflow without a session.
    Workflow {
        workflow_ref: String,
        block_ref: Option<String>,
    },
    /// Address a workflow and one of its sessions together.
    Complete {
        workflow_ref: String,
        session_ref: String,
        block_ref: Option<String>,
    },
}

impl Target {
    /// Session that must be alive before the call is made, if any.
    pub fn session_ref(&self) -> Option<&str> {
        match self {
            Target::Session { session_ref, .. } | Target::Complete { session_ref, .. } => {
                Some(session_ref.as_str())
            }
            Target::Workflow { .. } => None,
        }
    }
}

/// Pick exactly one target for `record` under `policy`.
pub fn resolve(record: &WorkRecord, policy: TargetPolicy) -> Option<Target> {
    let block_ref = record.block_ref.clone();
    match policy {
        TargetPolicy::PreferSession => {
            if let Some(session_ref) = &record.session_ref {
                Some(Target::Session {
                    session_ref: session_ref.clone(),
                    block_ref,
                })
            } else {
                record.workflow_ref.as_ref().map(|workflow_ref| Target::Workflow {
                    workflow_ref: workflow_ref.clone(),
                    block_ref,
                })
            }
        }
        TargetPolicy::RequireWorkflowAndSession => {
            match (&record.workflow_ref, &record.session_ref) {
                (Some(workflow_ref), Some(session_ref)) => Some(Target::Complete {
                    workflow_ref: workflow_ref.clone(),
                    session_ref: session_ref.clone(),
                    block_ref,
                }),
                _ => None,
            }
        }
    }
}

/// Public form of a workflow reference: bare numeric ids become `[w<id>]`.
pub fn public_workflow_id(workflow_ref: &str) -> String {
    let trimmed = workflow_ref.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("[w{trimmed}]")
    } else {
        trimmed.to_string()
    }
}

/// Rewrite `$` to `£`: the engine reads `$` as a field reference.
/// A literal `#` is escaped so it does not start a fragment.
pub fn escape_extra_data(data: &str) -> String {
    data.replace('$', "£").replace('#', "%23")
}

/// Build the timed-call URI for `target`.
///
/// Layout: `{base}?TCV=1[&WID=..][&SID=..][&BID=..][&extra-data]`.
/// Reference values are percent-encoded; extra data is already a query
/// fragment and is appended as is, apart from [`escape_extra_data`].
pub fn build_uri(base_url: &str, target: &Target, extra_data: Option<&str>) -> String {
    let (workflow_ref, session_ref, block_ref) = match target {
        Target::Session { session_ref, block_ref } => (None, Some(session_ref), block_ref),
        Target::Workflow { workflow_ref, block_ref } => (Some(workflow_ref), None, block_ref),
        Target::Complete {
            workflow_ref,
            session_ref,
            block_ref,
        } => (Some(workflow_ref), Some(session_ref), block_ref),
    };

    let separator = if base_url.contains('?') { '&' } else { '?' };
    let mut uri = format!("{base_url}{separator}TCV=1");
    if let Some(wid) = workflow_ref {
        uri.push_str(&format!("&WID={}", urlencoding::encode(&public_workflow_id(wid))));
    }
    if let Some(sid) = session_ref {
        uri.push_str(&format!("&SID={}", urlencoding::encode(sid)));
    }
    if let Some(bid) = block_ref.as_deref().filter(|b| !b.is_empty()) {
        uri.push_str(&format!("&BID={}", urlencoding::encode(bid)));
    }
    if let Some(data) = extra_data.filter(|d| !d.is_empty()) {
        let data = escape_extra_data(data);
        if !data.starts_with('&') {
            uri.push('&');
        }
        uri.push_str(&data);
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(session: Option<&str>, workflow: Option<&str>) -> WorkRecord {
        WorkRecord {
            sequence_id: 7,
            scheduled_at: Utc::now(),
            delay_minutes: 0,
            session_ref: session.map(String::from),
            workflow_ref: workflow.map(String::from),
            block_ref: Some("b1".into()),
            extra_data: None,
            enabled: true,
            result: None,
        }
    }

    #[test]
    fn test_session_wins_over_workflow() {
        let rec = record(Some("s-1"), Some("wf-1"));
        let target = resolve(&rec, TargetPolicy::PreferSession).unwrap();
        assert_eq!(
            target,
            Target::Session {
                session_ref: "s-1".into(),
                block_ref: Some("b1".into())
            }
        );
        let uri = build_uri("http://h/flussueng.php", &target, None);
        assert_eq!(uri, "http://h/flussueng.php?TCV=1&SID=s-1&BID=b1");
        assert!(!uri.contains("WID="));
    }

    #[test]
    fn test_workflow_only_has_no_session() {
        let rec = record(None, Some("wf-1"));
        let target = resolve(&rec, TargetPolicy::PreferSession).unwrap();
        assert!(target.session_ref().is_none());
        let uri = build_uri("http://h/e.php", &target, None);
        assert_eq!(uri, "http://h/e.php?TCV=1&WID=wf-1&BID=b1");
        assert!(!uri.contains("SID="));
    }

    #[test]
    fn test_complete_policy_requires_both() {
        let both = record(Some("s-1"), Some("wf-1"));
        let target = resolve(&both, TargetPolicy::RequireWorkflowAndSession).unwrap();
        assert_eq!(target.session_ref(), Some("s-1"));
        assert_eq!(
            build_uri("http://h/e.php", &target, None),
            "http://h/e.php?TCV=1&WID=wf-1&SID=s-1&BID=b1"
        );

        assert!(resolve(&record(None, Some("wf-1")), TargetPolicy::RequireWorkflowAndSession).is_none());
        assert!(resolve(&record(Some("s-1"), None), TargetPolicy::RequireWorkflowAndSession).is_none());
    }

    #[test]
    fn test_no_reference_resolves_nothing() {
        assert!(resolve(&record(None, None), TargetPolicy::PreferSession).is_none());
    }

    #[test]
    fn test_extra_data_sigil_substitution() {
        let target = resolve(&record(None, Some("wf-1")), TargetPolicy::PreferSession).unwrap();
        let uri = build_uri("http://h/e.php", &target, Some("$name=John&$city=Rome"));
        assert!(uri.ends_with("&£name=John&£city=Rome"));
        assert!(!uri.contains('$'));
    }

    #[test]
    fn test_extra_data_leading_ampersand_kept_single() {
        let target = resolve(&record(None, Some("wf-1")), TargetPolicy::PreferSession).unwrap();
        let uri = build_uri("http://h/e.php", &target, Some("&$x=1"));
        assert!(uri.ends_with("BID=b1&£x=1"));
        assert!(!uri.contains("&&"));
    }

    #[test]
    fn test_optional_parts_omitted() {
        let target = Target::Workflow {
            workflow_ref: "wf-1".into(),
            block_ref: Some(String::new()),
        };
        assert_eq!(build_uri("http://h/e.php", &target, Some("")), "http://h/e.php?TCV=1&WID=wf-1");
    }

    #[test]
    fn test_base_url_with_query() {
        let target = Target::Workflow {
            workflow_ref: "wf-1".into(),
            block_ref: None,
        };
        assert_eq!(
            build_uri("http://h/e.php?lang=it", &target, None),
            "http://h/e.php?lang=it&TCV=1&WID=wf-1"
        );
    }

    #[test]
    fn test_reference_values_are_encoded() {
        let target = Target::Complete {
            workflow_ref: "123".into(),
            session_ref: "s&1#x".into(),
            block_ref: Some("b 1".into()),
        };
        assert_eq!(
            build_uri("http://h/e.php", &target, Some("$note=a#b")),
            "http://h/e.php?TCV=1&WID=%5Bw123%5D&SID=s%261%23x&BID=b%201&£note=a%23b"
        );
    }

    #[test]
    fn test_public_workflow_id() {
        assert_eq!(public_workflow_id("123"), "[w123]");
        assert_eq!(public_workflow_id("[w123]"), "[w123]");
        assert_eq!(public_workflow_id("wf-9"), "wf-9");
    }
}
