use std::time::Duration;

use anyhow::{Context, Result};
use layerscope_shared::{HubInfo, RegistryImage};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::image_name::parse_image_name;

pub const DEFAULT_HUB_URL: &str = "https://hub.docker.com";

const BADGE_PATTERN: &str = r"https?://images\.microbadger\.com/badges(/[a-z\-]*)(/[a-z0-9\-\._]*)?/[a-z0-9\-\._]*(:[a-zA-Z0-9\-\._]+)?\.svg";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: String,
}

/// Client for the hub's repository summary API.
#[derive(Clone)]
pub struct HubService {
    client: reqwest::Client,
    base_url: String,
    badge_re: Regex,
}

impl HubService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build hub client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            badge_re: Regex::new(BADGE_PATTERN)?,
        })
    }

    /// Exchange hub credentials for a JWT.
    pub async fn login(&self, user: &str, password: &str) -> Result<String> {
        let url = format!("{}/v2/users/login/", self.base_url);
        log::debug!("Logging into {}", url);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: user,
                password,
            })
            .send()
            .await
            .context("Failed to send hub login request")?;

        if response.status() != StatusCode::OK {
            anyhow::bail!("Incorrect credentials ({})", response.status());
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to parse hub login response")?;

        Ok(login.token)
    }

    /// Repository summary. A 200 whose body doesn't describe a repository is
    /// treated as an error.
    pub async fn info(&self, image: &RegistryImage) -> Result<HubInfo> {
        let parsed = parse_image_name(&image.name);
        let url = format!(
            "{}/v2/repositories/{}/{}/",
            self.base_url, parsed.org, parsed.image
        );
        log::debug!("Getting hub info from {}", url);

        let mut request = self.client.get(&url);
        if let Some(creds) = image
            .credentials
            .as_ref()
            .filter(|c| !c.user.is_empty() && !c.password.is_empty())
        {
            let token = self.login(&creds.user, &creds.password).await?;
            request = request.header("Authorization", format!("JWT {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Error getting hub info from {}", url))?;

        if response.status() != StatusCode::OK {
            anyhow::bail!("Error getting hub info for {}: {}", image.name, response.status());
        }

        let info: HubInfo = response
            .json()
            .await
            .with_context(|| format!("Error unmarshalling hub info for {}", image.name))?;

        if info.name.is_empty() {
            anyhow::bail!("Failed to get hub info for {}", parsed.repository());
        }

        Ok(info)
    }

    /// Number of badge links in a repository description.
    pub fn badges_installed(&self, full_description: &str) -> i32 {
        self.badge_re.find_iter(full_description).count() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_badges_in_description() {
        let hub = HubService::new(DEFAULT_HUB_URL, Duration::from_secs(1)).unwrap();
        let description = "[![](https://images.microbadger.com/badges/image/org/app.svg)](x) \
            and ![](https://images.microbadger.com/badges/version/org/app:1.0.svg) \
            but not https://example.com/badge.svg";

        assert_eq!(hub.badges_installed(description), 2);
        assert_eq!(hub.badges_installed(""), 0);
    }
}
