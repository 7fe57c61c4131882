// 能力矩阵：运行环境到可用能力的静态映射，纯查表无副作用
use std::fmt;

use super::probe::{EnvironmentClassification, Variant};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Capability {
    // 修改共享资源（主题、布局替换）
    ResourcePatching,
    // 进程级拦截（系统框架类）
    ProcessWideHooks,
    // 绕过签名/完整性校验
    IntegrityBypass,
    // 通过桥接服务查询宿主已加载模块
    BridgeService,
    // 可直接读写原生配置存储
    NativePreferences,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::ResourcePatching,
        Capability::ProcessWideHooks,
        Capability::IntegrityBypass,
        Capability::BridgeService,
        Capability::NativePreferences,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::ResourcePatching => "RESOURCE_PATCHING",
            Self::ProcessWideHooks => "PROCESS_WIDE_HOOKS",
            Self::IntegrityBypass => "INTEGRITY_BYPASS",
            Self::BridgeService => "BRIDGE_SERVICE",
            Self::NativePreferences => "NATIVE_PREFERENCES",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.name().eq_ignore_ascii_case(name.trim()))
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Support {
    Yes,
    No,
    // 该环境下不需要此能力，视为未授予
    NotNeeded,
}

impl Support {
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Yes)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct CapabilitySet {
    variant: Variant,
    support: [Support; 5],
}

impl CapabilitySet {
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn support(&self, capability: Capability) -> Support {
        self.support[capability.index()]
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.support(capability).is_granted()
    }

    pub fn granted(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.has(*capability))
    }
}

// 列顺序与 Capability::ALL 一致
static ROOTED_CLASSIC: CapabilitySet = CapabilitySet {
    variant: Variant::RootedClassic,
    support: [
        Support::Yes,
        Support::Yes,
        Support::Yes,
        Support::NotNeeded,
        Support::No,
    ],
};

static ROOTLESS_EMBEDDED: CapabilitySet = CapabilitySet {
    variant: Variant::RootlessEmbedded,
    support: [Support::Yes, Support::No, Support::Yes, Support::Yes, Support::Yes],
};

static ROOTLESS_MANAGED: CapabilitySet = CapabilitySet {
    variant: Variant::RootlessManaged,
    support: [Support::No, Support::No, Support::Yes, Support::No, Support::Yes],
};

pub fn capabilities_for_variant(variant: Variant) -> &'static CapabilitySet {
    match variant {
        Variant::RootedClassic => &ROOTED_CLASSIC,
        Variant::RootlessEmbedded => &ROOTLESS_EMBEDDED,
        Variant::RootlessManaged => &ROOTLESS_MANAGED,
    }
}

pub fn capabilities_for(classification: &EnvironmentClassification) -> &'static CapabilitySet {
    capabilities_for_variant(classification.variant())
}

// 按名称查询；未知能力名默认视为可用，只有显式受限的能力才会被拒绝
pub fn is_available(classification: &EnvironmentClassification, capability_name: &str) -> bool {
    match Capability::from_name(capability_name) {
        Some(capability) => capabilities_for(classification).has(capability),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(variant: Variant) -> Vec<Support> {
        let set = capabilities_for(&EnvironmentClassification::fixed(variant));
        Capability::ALL
            .into_iter()
            .take(4)
            .map(|capability| set.support(capability))
            .collect()
    }

    #[test]
    fn matrix_matches_policy_table() {
        use Support::{No, NotNeeded, Yes};
        assert_eq!(table(Variant::RootedClassic), vec![Yes, Yes, Yes, NotNeeded]);
        assert_eq!(table(Variant::RootlessEmbedded), vec![Yes, No, Yes, Yes]);
        assert_eq!(table(Variant::RootlessManaged), vec![No, No, Yes, No]);
    }

    #[test]
    fn every_variant_is_mapped() {
        for variant in Variant::ALL {
            assert_eq!(capabilities_for_variant(variant).variant(), variant);
        }
    }

    #[test]
    fn native_preferences_only_rootless() {
        let native = |variant| capabilities_for_variant(variant).has(Capability::NativePreferences);
        assert!(!native(Variant::RootedClassic));
        assert!(native(Variant::RootlessEmbedded));
        assert!(native(Variant::RootlessManaged));
    }

    #[test]
    fn lookup_by_name() {
        let managed = EnvironmentClassification::fixed(Variant::RootlessManaged);
        assert!(!is_available(&managed, "RESOURCE_PATCHING"));
        assert!(!is_available(&managed, "resource_patching"));
        assert!(is_available(&managed, "INTEGRITY_BYPASS"));
        assert!(is_available(&managed, "TELEPORTATION"));
        let rooted = EnvironmentClassification::fixed(Variant::RootedClassic);
        assert!(!is_available(&rooted, "BRIDGE_SERVICE"));
    }

    #[test]
    fn granted_lists_yes_only() {
        let granted: Vec<_> = capabilities_for_variant(Variant::RootedClassic)
            .granted()
            .collect();
        assert_eq!(
            granted,
            vec![
                Capability::ResourcePatching,
                Capability::ProcessWideHooks,
                Capability::IntegrityBypass
            ]
        );
    }
}
