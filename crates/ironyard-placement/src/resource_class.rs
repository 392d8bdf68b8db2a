//! Resource class naming.
//!
//! Placement ships a fixed set of standard classes. Anything else must be a
//! custom class: `CUSTOM_` followed by uppercase alphanumerics and underscores.

use std::sync::LazyLock;

use regex::Regex;

/// Classes every placement deployment knows about.
pub const STANDARD_CLASSES: &[&str] = &[
    "VCPU",
    "MEMORY_MB",
    "DISK_GB",
    "PCI_DEVICE",
    "SRIOV_NET_VF",
    "NUMA_SOCKET",
    "NUMA_CORE",
    "NUMA_THREAD",
    "NUMA_MEMORY_MB",
    "IPV4_ADDRESS",
];

pub const CUSTOM_PREFIX: &str = "CUSTOM_";

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^0-9A-Z]+").expect("static regex"));

static CUSTOM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^CUSTOM_[A-Z0-9_]+$").expect("static regex"));

pub fn is_standard(name: &str) -> bool {
    STANDARD_CLASSES.contains(&name)
}

pub fn is_valid_custom(name: &str) -> bool {
    CUSTOM_NAME.is_match(name)
}

/// Turn a node's free-form resource class (`"baremetal gold"`) into a
/// placement class name (`"CUSTOM_BAREMETAL_GOLD"`).
///
/// Standard and already-normalized custom names are returned unchanged.
pub fn normalize_name(name: &str) -> String {
    if is_standard(name) || is_valid_custom(name) {
        return name.to_string();
    }
    let upper = name.to_uppercase();
    let norm = INVALID_CHARS.replace_all(&upper, "_");
    format!("{CUSTOM_PREFIX}{norm}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_classes_pass_through() {
        assert_eq!(normalize_name("VCPU"), "VCPU");
        assert_eq!(normalize_name("MEMORY_MB"), "MEMORY_MB");
    }

    #[test]
    fn custom_names_are_prefixed_and_cleaned() {
        assert_eq!(normalize_name("gold"), "CUSTOM_GOLD");
        assert_eq!(normalize_name("baremetal gold-2"), "CUSTOM_BAREMETAL_GOLD_2");
        assert_eq!(normalize_name("a..b"), "CUSTOM_A_B");
    }

    #[test]
    fn normalized_custom_names_are_stable() {
        assert_eq!(normalize_name("CUSTOM_GOLD"), "CUSTOM_GOLD");
        assert!(is_valid_custom(&normalize_name("weird name!")));
    }

    #[test]
    fn validity_check() {
        assert!(is_valid_custom("CUSTOM_X1"));
        assert!(!is_valid_custom("CUSTOM_"));
        assert!(!is_valid_custom("custom_x"));
        assert!(!is_valid_custom("VCPU"));
    }
}
