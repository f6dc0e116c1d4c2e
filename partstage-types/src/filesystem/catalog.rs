use super::FileSystemSpec;
use serde::Deserialize;

// Load TOML data at compile time from the workspace resources directory
const FILESYSTEMS_TOML: &str = include_str!("../../../resources/filesystems.toml");

#[derive(Deserialize)]
struct FileSystemCatalog {
    filesystems: Vec<FileSystemSpec>,
}

pub(super) fn parse_catalog(raw: &str) -> Result<Vec<FileSystemSpec>, toml::de::Error> {
    toml::from_str::<FileSystemCatalog>(raw).map(|catalog| catalog.filesystems)
}

/// Filesystems shipped with the crate, in registration order.
///
/// Falls back to the two well-known specs if the compiled-in catalog cannot be parsed.
pub static BUILTIN_FILESYSTEMS: std::sync::LazyLock<Vec<FileSystemSpec>> =
    std::sync::LazyLock::new(|| {
        if let Ok(specs) = parse_catalog(FILESYSTEMS_TOML) {
            specs
        } else {
            vec![FileSystemSpec::free(), FileSystemSpec::extended()]
        }
    });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses() {
        let specs = parse_catalog(FILESYSTEMS_TOML).expect("catalog parses");
        assert!(specs.len() > 2);
        assert_eq!(specs[0], FileSystemSpec::free());
        assert_eq!(specs[1], FileSystemSpec::extended());
    }

    #[test]
    fn catalog_names_are_unique() {
        let specs = parse_catalog(FILESYSTEMS_TOML).expect("catalog parses");
        for (i, spec) in specs.iter().enumerate() {
            assert!(
                specs[i + 1..].iter().all(|other| other.name != spec.name),
                "duplicate filesystem {}",
                spec.name
            );
        }
    }
}
