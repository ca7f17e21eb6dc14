use layerscope_shared::OFFICIAL_NAMESPACE;

/// `org/image[:tag]` split into its parts. Single-segment names belong to
/// the official namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub org: String,
    pub image: String,
    pub tag: String,
}

impl ImageName {
    pub fn repository(&self) -> String {
        format!("{}/{}", self.org, self.image)
    }
}

pub fn parse_image_name(input: &str) -> ImageName {
    let (image, tag) = match input.split_once(':') {
        Some((image, tag)) => (image, tag),
        None => (input, "latest"),
    };

    let (org, image) = match image.split_once('/') {
        Some((org, image)) => (org, image),
        None => (OFFICIAL_NAMESPACE, image),
    };

    ImageName {
        org: org.to_string(),
        image: image.to_string(),
        tag: tag.to_string(),
    }
}

pub fn is_official(name: &str) -> bool {
    name.strip_prefix(OFFICIAL_NAMESPACE)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Name as users type it: official images lose their `library/` prefix.
pub fn display_name(name: &str) -> &str {
    name.strip_prefix(OFFICIAL_NAMESPACE)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

/// Page for the image on the site, keyed by its display name.
pub fn page_url(site_url: &str, name: &str, is_private: bool) -> String {
    let site_url = site_url.trim_end_matches('/');
    let name = display_name(name);
    if is_private {
        format!("{}/registry/docker/images/{}", site_url, name)
    } else {
        format!("{}/images/{}", site_url, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        let parsed = parse_image_name("microscaling/microscaling:v1");
        assert_eq!(parsed.org, "microscaling");
        assert_eq!(parsed.image, "microscaling");
        assert_eq!(parsed.tag, "v1");

        let parsed = parse_image_name("alpine");
        assert_eq!(parsed.repository(), "library/alpine");
        assert_eq!(parsed.tag, "latest");
    }

    #[test]
    fn official_names() {
        assert!(is_official("library/alpine"));
        assert!(!is_official("libraryx/alpine"));
        assert!(!is_official("org/library"));
        assert_eq!(display_name("library/alpine"), "alpine");
        assert_eq!(display_name("org/app"), "org/app");
    }

    #[test]
    fn page_urls() {
        assert_eq!(
            page_url("https://microbadger.com/", "org/app", false),
            "https://microbadger.com/images/org/app"
        );
        assert_eq!(
            page_url("https://microbadger.com", "org/app", true),
            "https://microbadger.com/registry/docker/images/org/app"
        );
        assert_eq!(
            page_url("https://microbadger.com", "library/alpine", false),
            "https://microbadger.com/images/alpine"
        );
    }
}
