//! Deterministic recommendation texts.

use crate::event::{EventKind, ThreatLevel, MAX_RECOMMENDATIONS, MAX_RECOMMENDATION_LEN};

/// Build the ordered, de-duplicated recommendation list for a
/// `(threat_level, kind)` pair. At most ten entries of at most 256 ASCII
/// bytes each.
pub(crate) fn generate(level: ThreatLevel, kind: EventKind) -> Vec<String> {
    let mut texts: Vec<&'static str> = Vec::new();

    match level {
        ThreatLevel::Critical => {
            texts.push("IMMEDIATE: Block process and investigate");
            texts.push("Alert security team immediately");
            texts.push("Isolate affected system");
            texts.push("Review system logs for related activity");
        }
        ThreatLevel::High => {
            texts.push("Monitor process closely");
            texts.push("Review system logs");
            texts.push("Consider blocking if pattern continues");
        }
        ThreatLevel::Medium => {
            texts.push("Log for future analysis");
            texts.push("Monitor for similar patterns");
        }
        ThreatLevel::Low => {
            texts.push("Continue monitoring");
        }
        ThreatLevel::None => {}
    }

    match kind {
        EventKind::Vulnerability => texts.push("Apply security patches immediately"),
        EventKind::Network => texts.push("Review network firewall rules"),
        // Kernel-side detections that score below the banding floor still
        // deserve a watch entry.
        EventKind::Security if level == ThreatLevel::None => {
            texts.push("Monitor for similar patterns");
        }
        _ => {}
    }

    let mut out: Vec<String> = Vec::with_capacity(texts.len());
    for text in texts {
        debug_assert!(text.len() <= MAX_RECOMMENDATION_LEN);
        debug_assert!(text.is_ascii());
        if !out.iter().any(|existing| existing == text) {
            out.push(text.to_string());
        }
        if out.len() == MAX_RECOMMENDATIONS {
            break;
        }
    }
    out
}
