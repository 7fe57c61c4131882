// 兼容性闸门：按操作声明的能力需求决定放行、拒绝或降级
use crate::errno::Errno;
use crate::log;
use std::collections::BTreeMap;
use std::fmt;

use super::capability::{Capability, capabilities_for};
use super::probe::EnvironmentClassification;
use super::record::{self, RecordOp};
use super::state::Diagnostics;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requirement {
    // 缺少能力时拒绝
    Hard,
    // 缺少能力时仍尝试，但附带提示
    Soft,
    // 能力仅用于增强，缺少时照常放行
    Optional,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allow,
    Deny,
    Degrade(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny)
    }

    pub fn caveat(&self) -> Option<&str> {
        match self {
            Self::Degrade(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("ALLOW"),
            Self::Deny => f.write_str("DENY"),
            Self::Degrade(reason) => write!(f, "DEGRADE({reason})"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationSpec {
    pub name: String,
    pub capability: Capability,
    pub requirement: Requirement,
    // 降级时展示给用户的说明
    pub caveat: String,
}

impl OperationSpec {
    pub fn new(name: &str, capability: Capability, requirement: Requirement, caveat: &str) -> Self {
        Self {
            name: name.to_string(),
            capability,
            requirement,
            caveat: caveat.to_string(),
        }
    }
}

pub const OP_RESOURCE_PATCHING: &str = "install-resource-patching-hook";
pub const OP_THEME_INJECTION: &str = "inject-theme-resources";
pub const OP_PROCESS_WIDE_HOOK: &str = "install-process-wide-hook";
pub const OP_INTEGRITY_BYPASS: &str = "bypass-integrity-check";
pub const OP_MODULE_LISTING: &str = "query-loaded-modules";
pub const OP_SYSTEM_UI_HOOK: &str = "hook-system-ui";

// 内置操作表
fn builtin_operations() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            OP_RESOURCE_PATCHING,
            Capability::ResourcePatching,
            Requirement::Hard,
            "shared resources cannot be replaced in this environment",
        ),
        OperationSpec::new(
            OP_THEME_INJECTION,
            Capability::ResourcePatching,
            Requirement::Soft,
            "theme colors apply to app views only, resource overrides are skipped",
        ),
        OperationSpec::new(
            OP_PROCESS_WIDE_HOOK,
            Capability::ProcessWideHooks,
            Requirement::Hard,
            "framework classes outside the app cannot be hooked",
        ),
        OperationSpec::new(
            OP_INTEGRITY_BYPASS,
            Capability::IntegrityBypass,
            Requirement::Hard,
            "signature checks cannot be bypassed",
        ),
        OperationSpec::new(
            OP_MODULE_LISTING,
            Capability::BridgeService,
            Requirement::Optional,
            "loaded module list is unavailable",
        ),
        OperationSpec::new(
            OP_SYSTEM_UI_HOOK,
            Capability::ProcessWideHooks,
            Requirement::Soft,
            "system UI tweaks are limited to in-app surfaces",
        ),
    ]
}

#[derive(Clone)]
pub struct CompatibilityGate {
    operations: BTreeMap<String, OperationSpec>,
}

impl Default for CompatibilityGate {
    fn default() -> Self {
        Self::with_operations(builtin_operations())
    }
}

impl CompatibilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self::with_operations(Vec::new())
    }

    pub fn with_operations(operations: Vec<OperationSpec>) -> Self {
        Self {
            operations: operations
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    // 同名操作后注册者覆盖
    pub fn register(&mut self, spec: OperationSpec) {
        self.operations.insert(spec.name.clone(), spec);
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.get(name)
    }

    // 未登记的操作直接放行
    pub fn evaluate(
        &self,
        operation: &str,
        classification: &EnvironmentClassification,
    ) -> Decision {
        let Some(spec) = self.operations.get(operation) else {
            log::debug(format_args!("gate: unknown operation {} allowed", operation));
            return Decision::Allow;
        };
        let granted = capabilities_for(classification).has(spec.capability);
        let decision = match (granted, spec.requirement) {
            (true, _) | (false, Requirement::Optional) => Decision::Allow,
            (false, Requirement::Hard) => Decision::Deny,
            (false, Requirement::Soft) => Decision::Degrade(if spec.caveat.is_empty() {
                format!("{} unavailable", spec.capability)
            } else {
                spec.caveat.clone()
            }),
        };

        log::info(format_args!(
            "gate: {} requires {} ({:?}) on {} -> {}",
            operation,
            spec.capability,
            spec.requirement,
            classification.variant(),
            decision
        ));
        let status = if matches!(decision, Decision::Deny) {
            Errno::CapabilityDenied
        } else {
            Errno::Ok
        };
        record::add_record(RecordOp::Gate, status, operation, &decision.to_string());
        decision
    }

    // 过滤候选功能列表：拒绝的移出列表，降级的记录提示后保留
    pub fn filter_features<T, F>(
        &self,
        candidates: Vec<T>,
        operation_of: F,
        classification: &EnvironmentClassification,
        diagnostics: &Diagnostics,
    ) -> FilteredFeatures<T>
    where
        F: Fn(&T) -> (String, Option<String>),
    {
        let mut filtered = FilteredFeatures {
            admitted: Vec::new(),
            rejected: Vec::new(),
        };
        for candidate in candidates {
            let (name, operation) = operation_of(&candidate);
            let decision = match operation.as_deref() {
                Some(operation) => self.evaluate(operation, classification),
                None => Decision::Allow,
            };
            match decision {
                Decision::Deny => filtered.rejected.push((candidate, name)),
                Decision::Degrade(reason) => {
                    diagnostics.push_caveat(&name, &reason);
                    filtered.admitted.push((candidate, Decision::Degrade(reason)));
                }
                Decision::Allow => filtered.admitted.push((candidate, Decision::Allow)),
            }
        }
        filtered
    }
}

pub struct FilteredFeatures<T> {
    pub admitted: Vec<(T, Decision)>,
    // (候选项, 名称)，拒绝不算错误，不进入失败汇总
    pub rejected: Vec<(T, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::probe::Variant;

    fn gate_for(requirement: Requirement) -> CompatibilityGate {
        CompatibilityGate::with_operations(vec![OperationSpec::new(
            "patch",
            Capability::ResourcePatching,
            requirement,
            "resources are read-only",
        )])
    }

    #[test]
    fn every_requirement_and_variant_combination() {
        let expectations = [
            (Requirement::Hard, Variant::RootedClassic, Decision::Allow),
            (Requirement::Hard, Variant::RootlessEmbedded, Decision::Allow),
            (Requirement::Hard, Variant::RootlessManaged, Decision::Deny),
            (Requirement::Soft, Variant::RootedClassic, Decision::Allow),
            (Requirement::Soft, Variant::RootlessEmbedded, Decision::Allow),
            (
                Requirement::Soft,
                Variant::RootlessManaged,
                Decision::Degrade("resources are read-only".to_string()),
            ),
            (Requirement::Optional, Variant::RootedClassic, Decision::Allow),
            (Requirement::Optional, Variant::RootlessEmbedded, Decision::Allow),
            (Requirement::Optional, Variant::RootlessManaged, Decision::Allow),
        ];
        for (requirement, variant, expected) in expectations {
            let decision =
                gate_for(requirement).evaluate("patch", &EnvironmentClassification::fixed(variant));
            assert_eq!(decision, expected, "{requirement:?} on {variant}");
        }
    }

    #[test]
    fn degrade_without_caveat_still_has_reason() {
        let gate = CompatibilityGate::with_operations(vec![OperationSpec::new(
            "hooks",
            Capability::ProcessWideHooks,
            Requirement::Soft,
            "",
        )]);
        let managed = EnvironmentClassification::fixed(Variant::RootlessManaged);
        let decision = gate.evaluate("hooks", &managed);
        assert!(decision.caveat().is_some_and(|reason| !reason.is_empty()));
    }

    #[test]
    fn unknown_operation_is_allowed() {
        let gate = CompatibilityGate::empty();
        let managed = EnvironmentClassification::fixed(Variant::RootlessManaged);
        let decision = gate.evaluate("anything", &managed);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn builtin_resource_patching_denied_on_managed() {
        let gate = CompatibilityGate::new();
        let managed = EnvironmentClassification::fixed(Variant::RootlessManaged);
        assert_eq!(gate.evaluate(OP_RESOURCE_PATCHING, &managed), Decision::Deny);
        assert!(matches!(gate.evaluate(OP_THEME_INJECTION, &managed), Decision::Degrade(_)));
        assert_eq!(gate.evaluate(OP_INTEGRITY_BYPASS, &managed), Decision::Allow);
    }

    #[test]
    fn filter_removes_denied_and_records_caveats() {
        let gate = CompatibilityGate::new();
        let diagnostics = Diagnostics::new();
        let candidates = vec![
            ("custom_theme", Some(OP_RESOURCE_PATCHING)),
            ("theme_colors", Some(OP_THEME_INJECTION)),
            ("antirevoke", None),
        ];
        let filtered = gate.filter_features(
            candidates,
            |(name, op)| (name.to_string(), op.map(str::to_string)),
            &EnvironmentClassification::fixed(Variant::RootlessManaged),
            &diagnostics,
        );
        let admitted: Vec<&str> = filtered.admitted.iter().map(|((name, _), _)| *name).collect();
        assert_eq!(admitted, vec!["theme_colors", "antirevoke"]);
        assert_eq!(filtered.rejected.len(), 1);
        assert_eq!(filtered.rejected[0].1, "custom_theme");
        assert_eq!(diagnostics.caveats().len(), 1);
        assert_eq!(diagnostics.failure_count(), 0);
    }
}
