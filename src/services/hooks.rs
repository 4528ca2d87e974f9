//! Masking, guardrail and audit hook contracts.
//!
//! The hooks sit before and after the upstream call. Each is a pipeline
//! of named engines invoked in order: maskers rewrite the envelope and
//! produce an audit record, guardrails return an allow/block verdict.
//! No retries, no state.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::endpoint::Envelope;
use crate::core::error::{Result, RouterError};

/// Audit entry forwarded to the auditor collaborator.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub audit_type: String,
    pub payload: Value,
}

/// Sink for audit records. Implementations may encrypt at rest; the core
/// does not require it.
pub trait Auditor: Send + Sync {
    fn log(&self, record: AuditRecord);
}

/// Auditor that emits records to the structured log.
pub struct TracingAuditor;

impl Auditor for TracingAuditor {
    fn log(&self, record: AuditRecord) {
        tracing::info!(
            audit_type = %record.audit_type,
            payload = %record.payload,
            "audit record"
        );
    }
}

/// One masking rule engine: rewrites the envelope, reports what changed.
pub trait MaskerRule: Send + Sync {
    fn name(&self) -> &str;
    fn mask(&self, envelope: Envelope) -> (Envelope, AuditRecord);
}

/// Guardrail verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block { reason: String },
}

/// One guardrail classifier.
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, envelope: &Envelope) -> Verdict;
}

/// Registry of hook engines plus the configured pipelines.
#[derive(Default)]
pub struct HookRegistry {
    maskers: HashMap<String, Arc<dyn MaskerRule>>,
    guardrails: HashMap<String, Arc<dyn Guardrail>>,
    auditor: Option<Arc<dyn Auditor>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry::default()
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    pub fn register_masker(&mut self, rule: Arc<dyn MaskerRule>) {
        self.maskers.insert(rule.name().to_string(), rule);
    }

    pub fn register_guardrail(&mut self, guard: Arc<dyn Guardrail>) {
        self.guardrails.insert(guard.name().to_string(), guard);
    }

    pub fn has_masker(&self, name: &str) -> bool {
        self.maskers.contains_key(name)
    }

    /// Run the named masking engines in order. Unknown names are skipped
    /// with a warning so a partial deployment cannot take requests down.
    pub fn run_maskers(
        &self,
        pipeline: &[String],
        mut envelope: Envelope,
        with_audit: bool,
    ) -> Envelope {
        for name in pipeline {
            let Some(rule) = self.maskers.get(name) else {
                tracing::warn!(masker = %name, "unknown masking engine, skipping");
                continue;
            };
            let (masked, record) = rule.mask(envelope);
            envelope = masked;
            if with_audit {
                if let Some(auditor) = &self.auditor {
                    auditor.log(record);
                }
            }
        }
        envelope
    }

    /// Run the named guardrails in order; the first block verdict
    /// short-circuits.
    pub fn run_guardrails(
        &self,
        pipeline: &[String],
        envelope: &Envelope,
        with_audit: bool,
        stage: &str,
    ) -> Result<()> {
        for name in pipeline {
            let Some(guard) = self.guardrails.get(name) else {
                tracing::warn!(guardrail = %name, "unknown guardrail, skipping");
                continue;
            };
            if let Verdict::Block { reason } = guard.check(envelope) {
                if with_audit {
                    if let Some(auditor) = &self.auditor {
                        auditor.log(AuditRecord {
                            audit_type: format!("guardrail_{}", stage),
                            payload: json!({
                                "guardrail": name,
                                "reason": reason,
                            }),
                        });
                    }
                }
                return Err(RouterError::GuardrailBlocked(reason));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseMasker;

    impl MaskerRule for UppercaseMasker {
        fn name(&self) -> &str {
            "upper"
        }

        fn mask(&self, mut envelope: Envelope) -> (Envelope, AuditRecord) {
            if let Some(Value::String(s)) = envelope.get("text") {
                let upper = s.to_uppercase();
                envelope.insert("text".to_string(), Value::String(upper));
            }
            (
                envelope,
                AuditRecord {
                    audit_type: "masking".to_string(),
                    payload: json!({"rule": "upper"}),
                },
            )
        }
    }

    struct BlockEverything;

    impl Guardrail for BlockEverything {
        fn name(&self) -> &str {
            "deny_all"
        }

        fn check(&self, _envelope: &Envelope) -> Verdict {
            Verdict::Block {
                reason: "denied".to_string(),
            }
        }
    }

    struct AllowEverything;

    impl Guardrail for AllowEverything {
        fn name(&self) -> &str {
            "allow_all"
        }

        fn check(&self, _envelope: &Envelope) -> Verdict {
            Verdict::Allow
        }
    }

    fn envelope_with_text(text: &str) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.insert("text".to_string(), Value::String(text.to_string()));
        envelope
    }

    #[test]
    fn test_masker_pipeline_rewrites() {
        let mut registry = HookRegistry::new();
        registry.register_masker(Arc::new(UppercaseMasker));

        let envelope = envelope_with_text("secret");
        let masked = registry.run_maskers(&["upper".to_string()], envelope, false);
        assert_eq!(masked.get("text").unwrap(), "SECRET");
    }

    #[test]
    fn test_unknown_masker_skipped() {
        let registry = HookRegistry::new();
        let envelope = envelope_with_text("x");
        let out = registry.run_maskers(&["missing".to_string()], envelope, false);
        assert_eq!(out.get("text").unwrap(), "x");
    }

    #[test]
    fn test_guardrail_allows() {
        let mut registry = HookRegistry::new();
        registry.register_guardrail(Arc::new(AllowEverything));
        let envelope = envelope_with_text("x");
        assert!(registry
            .run_guardrails(&["allow_all".to_string()], &envelope, false, "request")
            .is_ok());
    }

    #[test]
    fn test_guardrail_blocks() {
        let mut registry = HookRegistry::new();
        registry.register_guardrail(Arc::new(AllowEverything));
        registry.register_guardrail(Arc::new(BlockEverything));

        let envelope = envelope_with_text("x");
        let err = registry
            .run_guardrails(
                &["allow_all".to_string(), "deny_all".to_string()],
                &envelope,
                false,
                "request",
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::GuardrailBlocked(_)));
    }

    #[test]
    fn test_audit_records_forwarded() {
        use std::sync::Mutex;

        struct CapturingAuditor(Mutex<Vec<AuditRecord>>);
        impl Auditor for CapturingAuditor {
            fn log(&self, record: AuditRecord) {
                self.0.lock().unwrap().push(record);
            }
        }

        let auditor = Arc::new(CapturingAuditor(Mutex::new(Vec::new())));
        let mut registry = HookRegistry::new().with_auditor(auditor.clone());
        registry.register_masker(Arc::new(UppercaseMasker));

        let envelope = envelope_with_text("x");
        registry.run_maskers(&["upper".to_string()], envelope, true);

        let records = auditor.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].audit_type, "masking");
    }
}
