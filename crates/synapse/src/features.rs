//! Feature availability.
//!
//! Edition features depend on the ESS edition reported by the homeserver.
//! Version features depend on the authorization server's version; each has a
//! minimum version and an unknown or unparseable version disables all of them.

use {
    semver::Version,
    serde::Serialize,
    tracing::warn,
};

use crate::ess::Edition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionFeature {
    Moderation,
    Auditing,
}

impl EditionFeature {
    pub const ALL: [Self; 2] = [Self::Moderation, Self::Auditing];

    pub fn is_available(self, edition: Option<Edition>) -> bool {
        match self {
            Self::Moderation | Self::Auditing => edition == Some(Edition::Pro),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionFeature {
    PersonalTokens,
}

impl VersionFeature {
    pub const ALL: [Self; 1] = [Self::PersonalTokens];

    /// Lowest authorization server version offering the feature.
    pub fn min_version(self) -> &'static str {
        match self {
            Self::PersonalTokens => "v1.5.0-rc.0",
        }
    }
}

/// Parse a version the way release tags are written: a leading `v` or `=`
/// and surrounding whitespace are tolerated.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V', '=']);
    Version::parse(trimmed).ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureStatus {
    pub moderation: bool,
    pub auditing: bool,
    pub personal_tokens: bool,
}

impl FeatureStatus {
    pub fn compute(edition: Option<Edition>, auth_version: Option<&str>) -> Self {
        let version = match auth_version {
            Some(raw) => {
                let parsed = parse_version(raw);
                if parsed.is_none() {
                    warn!(version = raw, "unparseable authorization server version, version-gated features disabled");
                }
                parsed
            },
            None => None,
        };
        let supports = |feature: VersionFeature| {
            let (Some(have), Some(min)) = (version.as_ref(), parse_version(feature.min_version()))
            else {
                return false;
            };
            *have >= min
        };
        Self {
            moderation: EditionFeature::Moderation.is_available(edition),
            auditing: EditionFeature::Auditing.is_available(edition),
            personal_tokens: supports(VersionFeature::PersonalTokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edition_features_need_pro() {
        for feature in EditionFeature::ALL {
            assert!(feature.is_available(Some(Edition::Pro)));
            assert!(!feature.is_available(Some(Edition::Community)));
            assert!(!feature.is_available(None));
        }
    }

    #[test]
    fn test_min_versions_parse() {
        for feature in VersionFeature::ALL {
            assert!(parse_version(feature.min_version()).is_some());
        }
    }

    #[test]
    fn test_parse_version_is_lenient_about_prefix() {
        assert_eq!(parse_version(" v1.5.0 "), Some(Version::new(1, 5, 0)));
        assert_eq!(parse_version("=2.0.1"), Some(Version::new(2, 0, 1)));
        assert!(parse_version("latest").is_none());
        assert!(parse_version("1.5").is_none());
    }

    #[test]
    fn test_personal_tokens_threshold() {
        let on = |v: &str| FeatureStatus::compute(None, Some(v)).personal_tokens;
        assert!(on("v1.5.0-rc.0"));
        assert!(on("1.5.0-rc.1"));
        assert!(on("1.5.0"));
        assert!(on("2.0.0"));
        assert!(!on("1.5.0-beta.3"));
        assert!(!on("1.4.9"));
    }

    #[test]
    fn test_unknown_version_disables_version_features() {
        assert!(!FeatureStatus::compute(Some(Edition::Pro), None).personal_tokens);
        assert!(!FeatureStatus::compute(Some(Edition::Pro), Some("main")).personal_tokens);
    }

    #[test]
    fn test_compute_combines_both_sources() {
        assert_eq!(
            FeatureStatus::compute(Some(Edition::Pro), Some("1.6.0")),
            FeatureStatus {
                moderation: true,
                auditing: true,
                personal_tokens: true,
            }
        );
        assert_eq!(FeatureStatus::compute(None, None), FeatureStatus::default());
    }
}
