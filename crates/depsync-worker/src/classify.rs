//! Package classification: scheme normalization, the scheme → external
//! service kind table, and the dependency-indexing allow-list.

use depsync_core::{Package, PackageReference};

/// Scheme emitted by JVM indexers (scip-java and friends).
pub const JVM_PACKAGES_SCHEME: &str = "semanticdb";
/// Scheme emitted by JavaScript/TypeScript indexers.
pub const NPM_PACKAGES_SCHEME: &str = "npm";
/// Scheme emitted by the Rust indexer.
pub const RUST_PACKAGES_SCHEME: &str = "rust-analyzer";

/// External-service kind owning each recognized package scheme.
/// Unknown schemes map to no entry.
pub fn kind_for_scheme(scheme: &str) -> Option<&'static str> {
    match scheme {
        JVM_PACKAGES_SCHEME => Some("JVMPACKAGES"),
        NPM_PACKAGES_SCHEME => Some("NPMPACKAGES"),
        RUST_PACKAGES_SCHEME => Some("RUSTPACKAGES"),
        _ => None,
    }
}

/// Map a raw package reference to a normalized package identity.
///
/// JVM package names arrive as `maven/<group>/<artifact>`; the catalog
/// keys them as `<group>:<artifact>`.
pub fn normalize_package(reference: &PackageReference) -> Package {
    let mut pkg = Package {
        scheme: reference.scheme.clone(),
        name: reference.name.clone(),
        version: reference.version.clone(),
    };

    if pkg.scheme == JVM_PACKAGES_SCHEME {
        pkg.name = pkg
            .name
            .strip_prefix("maven/")
            .unwrap_or(&pkg.name)
            .replace('/', ":");
    }

    pkg
}

/// Indexers whose uploads get downstream dependency-indexing jobs.
const INDEXING_ALLOW_LIST: &[&str] = &[
    "lsif-go",
    "scip-java",
    "lsif-java",
    "lsif-tsc",
    "scip-typescript",
    "lsif-typescript",
    "rust-analyzer",
];

/// Whether an upload produced by the given indexer should fan out into
/// dependency-indexing jobs.
pub fn should_index_dependencies(indexer: &str) -> bool {
    INDEXING_ALLOW_LIST.contains(&indexer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(scheme: &str, name: &str, version: &str) -> PackageReference {
        PackageReference {
            scheme: scheme.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(kind_for_scheme("semanticdb"), Some("JVMPACKAGES"));
        assert_eq!(kind_for_scheme("npm"), Some("NPMPACKAGES"));
        assert_eq!(kind_for_scheme("rust-analyzer"), Some("RUSTPACKAGES"));
        assert_eq!(kind_for_scheme("gomod"), None);
        assert_eq!(kind_for_scheme(""), None);
    }

    #[test]
    fn test_normalize_jvm_strips_prefix_and_substitutes_separators() {
        let pkg = normalize_package(&reference(
            "semanticdb",
            "maven/com.google.guava/guava",
            "31.1",
        ));
        assert_eq!(pkg.name, "com.google.guava:guava");
        assert_eq!(pkg.scheme, "semanticdb");
        assert_eq!(pkg.version, "31.1");
    }

    #[test]
    fn test_normalize_jvm_without_prefix_still_substitutes() {
        let pkg = normalize_package(&reference("semanticdb", "org.scala/lib", "2.13"));
        assert_eq!(pkg.name, "org.scala:lib");
    }

    #[test]
    fn test_normalize_other_schemes_untouched() {
        let pkg = normalize_package(&reference("npm", "@types/node", "18.0.0"));
        assert_eq!(pkg.name, "@types/node");

        let pkg = normalize_package(&reference("rust-analyzer", "serde", "1.0.0"));
        assert_eq!(pkg.name, "serde");
    }

    #[test]
    fn test_indexing_allow_list() {
        assert!(should_index_dependencies("lsif-go"));
        assert!(should_index_dependencies("scip-typescript"));
        assert!(should_index_dependencies("rust-analyzer"));
        assert!(!should_index_dependencies("scip-python"));
        assert!(!should_index_dependencies(""));
    }
}
