use std::path::Path;

use konsave_interface::find_in;
use shared::domain::Profile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameCheck {
    Empty,
    Available(String),
    Collides { requested: String, existing: Profile },
}

/// Validates a name typed for a new profile against the current listing.
pub fn validate_profile_name(input: &str, profiles: &[Profile]) -> NameCheck {
    let requested = input.trim();
    if requested.is_empty() {
        return NameCheck::Empty;
    }
    match find_in(profiles, requested) {
        Some(existing) => NameCheck::Collides {
            requested: requested.to_string(),
            existing: existing.clone(),
        },
        None => NameCheck::Available(requested.to_string()),
    }
}

/// Profile name an archive will be imported under (its file name without extension).
pub fn archive_profile_name(archive: &Path) -> Option<String> {
    archive
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn listing() -> Vec<Profile> {
        vec![Profile::new(1, "Dark"), Profile::new(2, "Light")]
    }

    #[test]
    fn reports_case_insensitive_collision() {
        assert_eq!(
            validate_profile_name("dark", &listing()),
            NameCheck::Collides {
                requested: "dark".to_string(),
                existing: Profile::new(1, "Dark"),
            }
        );
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(validate_profile_name("   ", &listing()), NameCheck::Empty);
    }

    #[test]
    fn new_name_is_trimmed() {
        assert_eq!(
            validate_profile_name("  Dusk ", &listing()),
            NameCheck::Available("Dusk".to_string())
        );
    }

    #[test]
    fn archive_name_drops_directory_and_extension() {
        assert_eq!(
            archive_profile_name(&PathBuf::from("/home/me/Dark.knsv")).as_deref(),
            Some("Dark")
        );
        assert_eq!(archive_profile_name(&PathBuf::from("/")), None);
    }
}
