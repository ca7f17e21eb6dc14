use std::collections::{BTreeMap, HashMap};

use layerscope_shared::{License, VersionControl};

const LICENSE_CODE: &str = "org.label-schema.license";
const VCS_TYPE: &str = "org.label-schema.vcs-type";
const VCS_URL: &str = "org.label-schema.vcs-url";
const VCS_REF: &str = "org.label-schema.vcs-ref";
const GITHUB_SSH: &str = "git@github.com:";
const GITHUB_HTTPS: &str = "https://github.com/";

const LICENSE_ALTERNATIVES: &[&str] = &["license"];
const VCS_TYPE_ALTERNATIVES: &[&str] = &["vcs-type"];
const VCS_URL_ALTERNATIVES: &[&str] = &["vcs-url"];
const VCS_REF_ALTERNATIVES: &[&str] = &["vcs-ref"];

const LICENSE_URLS: &[(&str, &str)] = &[
    ("agpl-3.0", "https://opensource.org/licenses/AGPL-3.0"),
    ("apache-2.0", "https://opensource.org/licenses/Apache-2.0"),
    ("bsd-2-clause", "https://opensource.org/licenses/BSD-2-Clause"),
    ("bsd-3-clause", "https://opensource.org/licenses/BSD-3-Clause"),
    ("epl-1.0", "https://opensource.org/licenses/EPL-1.0"),
    ("gpl-2.0", "https://opensource.org/licenses/GPL-2.0"),
    ("gpl-3.0", "https://opensource.org/licenses/GPL-3.0"),
    ("isc", "https://opensource.org/licenses/ISC"),
    ("lgpl-2.1", "https://opensource.org/licenses/LGPL-2.1"),
    ("lgpl-3.0", "https://opensource.org/licenses/LGPL-3.0"),
    ("mit", "https://opensource.org/licenses/MIT"),
    ("mpl-2.0", "https://opensource.org/licenses/MPL-2.0"),
    ("unlicense", "https://unlicense.org/"),
];

/// Label-schema.org metadata pulled out of a version's labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLabels {
    pub labels: HashMap<String, String>,
    pub license: Option<License>,
    pub version_control: Option<VersionControl>,
}

/// Parses the raw label JSON stored on a version. Unparseable or empty
/// input yields no labels.
pub fn parse_labels(raw: &str) -> ParsedLabels {
    if raw.trim().is_empty() {
        return ParsedLabels::default();
    }

    let labels: BTreeMap<String, String> = match serde_json::from_str(raw) {
        Ok(labels) => labels,
        Err(e) => {
            log::error!("Error unmarshalling labels {}: {}", raw, e);
            return ParsedLabels::default();
        }
    };

    ParsedLabels {
        license: parse_license(&labels),
        version_control: parse_version_control(&labels),
        labels: labels.into_iter().collect(),
    }
}

fn get_label<'a>(labels: &'a BTreeMap<String, String>, main: &str, alternatives: &[&str]) -> &'a str {
    if let Some(value) = labels.get(main) {
        return value;
    }

    alternatives
        .iter()
        .find_map(|alt| {
            labels
                .iter()
                .find(|(key, _)| key.contains(alt))
                .map(|(_, value)| value.as_str())
        })
        .unwrap_or("")
}

fn parse_license(labels: &BTreeMap<String, String>) -> Option<License> {
    let code = get_label(labels, LICENSE_CODE, LICENSE_ALTERNATIVES);
    if code.is_empty() {
        return None;
    }

    let lower = code.to_lowercase();
    let url = LICENSE_URLS
        .iter()
        .find(|(c, _)| *c == lower)
        .map(|(_, url)| url.to_string());

    Some(License {
        code: code.to_string(),
        url,
    })
}

fn parse_version_control(labels: &BTreeMap<String, String>) -> Option<VersionControl> {
    let vcs_type = get_label(labels, VCS_TYPE, VCS_TYPE_ALTERNATIVES);
    let url = get_label(labels, VCS_URL, VCS_URL_ALTERNATIVES);
    let commit = get_label(labels, VCS_REF, VCS_REF_ALTERNATIVES);

    // Only GitHub is linkable for now
    let is_git = vcs_type.is_empty() || vcs_type.eq_ignore_ascii_case("git");
    if is_git && !commit.is_empty() && url.contains("github.com") {
        return Some(github_version_control(url, commit));
    }

    None
}

fn github_version_control(url: &str, commit: &str) -> VersionControl {
    let url = url.replacen(GITHUB_SSH, GITHUB_HTTPS, 1);
    let url = url.strip_suffix(".git").unwrap_or(&url);

    VersionControl {
        vcs_type: "git".to_string(),
        url: format!("{}/tree/{}", url.trim_end_matches('/'), commit),
        commit: commit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_schema_labels() {
        let parsed = parse_labels(
            r#"{
                "org.label-schema.license": "MIT",
                "org.label-schema.vcs-url": "git@github.com:microscaling/microscaling.git",
                "org.label-schema.vcs-ref": "abc123",
                "maintainer": "someone"
            }"#,
        );

        assert_eq!(parsed.labels.len(), 4);
        let license = parsed.license.unwrap();
        assert_eq!(license.code, "MIT");
        assert_eq!(license.url.as_deref(), Some("https://opensource.org/licenses/MIT"));

        let vcs = parsed.version_control.unwrap();
        assert_eq!(vcs.vcs_type, "git");
        assert_eq!(vcs.url, "https://github.com/microscaling/microscaling/tree/abc123");
        assert_eq!(vcs.commit, "abc123");
    }

    #[test]
    fn falls_back_to_alternative_labels() {
        let parsed = parse_labels(
            r#"{"com.example.license": "Custom", "com.example.vcs-url": "https://github.com/org/repo", "com.example.vcs-ref": "def"}"#,
        );

        let license = parsed.license.unwrap();
        assert_eq!(license.code, "Custom");
        assert!(license.url.is_none());
        assert_eq!(
            parsed.version_control.unwrap().url,
            "https://github.com/org/repo/tree/def"
        );
    }

    #[test]
    fn non_github_or_missing_commit_has_no_vcs() {
        let parsed = parse_labels(
            r#"{"org.label-schema.vcs-url": "https://gitlab.com/org/repo", "org.label-schema.vcs-ref": "x"}"#,
        );
        assert!(parsed.version_control.is_none());

        let parsed = parse_labels(r#"{"org.label-schema.vcs-url": "https://github.com/org/repo"}"#);
        assert!(parsed.version_control.is_none());
    }

    #[test]
    fn bad_or_empty_labels() {
        assert_eq!(parse_labels(""), ParsedLabels::default());
        assert_eq!(parse_labels("not json"), ParsedLabels::default());
    }
}
