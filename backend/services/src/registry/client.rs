use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use layerscope_shared::{Credentials, RegistryImage};
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;

use super::error::RegistryError;
use super::manifest::Manifest;
use super::rate_limit::{DEFAULT_RATE_LIMIT_DELAY, RateLimiter};
use crate::image_name::parse_image_name;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";
pub const DEFAULT_SERVICE: &str = "registry.docker.io";

const MANIFEST_V1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub registry_url: String,
    pub auth_url: String,
    pub service: String,
    pub timeout: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            timeout: Duration::from_secs(10),
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry protocol client. Cheap to clone; every clone shares the HTTP
/// connection pool and the rate-limit cooldown.
#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    config: Arc<RegistryConfig>,
    rate_limiter: RateLimiter,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let rate_limiter = RateLimiter::new(config.rate_limit_delay);

        Ok(Self {
            client,
            config: Arc::new(config),
            rate_limiter,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Pull-scoped bearer token for `repository` (`org/image`). Credentials
    /// are sent as basic auth only when both parts are present.
    pub async fn obtain_token(
        &self,
        repository: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, RegistryError> {
        let url = format!("{}/token", self.config.auth_url.trim_end_matches('/'));
        let scope = format!("repository:{}:pull", repository);
        log::debug!("Getting auth token for {} from {}", repository, url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("service", self.config.service.as_str()), ("scope", scope.as_str())]);

        if let Some(creds) = credentials.filter(|c| !c.user.is_empty() && !c.password.is_empty()) {
            log::debug!("Setting authorization for user {}", creds.user);
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(RegistryError::Auth(format!(
                "token request for {} returned {}",
                repository,
                response.status()
            )));
        }

        let auth: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Auth(format!("bad token response for {}: {}", repository, e)))?;

        let token = if auth.token.is_empty() { auth.access_token } else { auth.token };
        if token.is_empty() {
            return Err(RegistryError::Auth(format!("empty token for {}", repository)));
        }

        log::debug!("Got new auth token for {}", repository);
        Ok(token)
    }

    /// Authenticated session bound to one repository.
    pub async fn repository(&self, image: &RegistryImage) -> Result<RepositoryClient, RegistryError> {
        let repository = parse_image_name(&image.name).repository();
        let token = self
            .obtain_token(&repository, image.credentials.as_ref())
            .await?;

        Ok(RepositoryClient {
            registry: self.clone(),
            repository,
            credentials: image.credentials.clone(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.registry_url.trim_end_matches('/'), path)
    }
}

pub struct RepositoryClient {
    registry: RegistryClient,
    repository: String,
    credentials: Option<Credentials>,
    token: String,
}

impl RepositoryClient {
    pub fn repository(&self) -> &str {
        &self.repository
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut request = self
            .registry
            .client
            .request(method, url)
            .bearer_auth(&self.token);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        Ok(request.send().await?)
    }

    /// Sends an authorized request. A 401 is answered by fetching a fresh
    /// token and retrying exactly once.
    async fn send(
        &mut self,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut response = self.dispatch(method.clone(), url, accept).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            log::debug!("Unauthorized on first attempt for {}", url);
            self.token = self
                .registry
                .obtain_token(&self.repository, self.credentials.as_ref())
                .await?;
            response = self.dispatch(method, url, accept).await?;
        }

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(RegistryError::Unauthorized(url.to_string())),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(RegistryError::RateLimited),
            status => Err(RegistryError::UnexpectedStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    pub async fn list_tags(&mut self) -> Result<Vec<String>, RegistryError> {
        let url = self
            .registry
            .url(&format!("/v2/{}/tags/list", self.repository));
        log::debug!("Getting tags at URL {}", url);

        let tag_list: TagList = self.send(Method::GET, &url, None).await?.json().await?;
        Ok(tag_list.tags.unwrap_or_default())
    }

    /// Manifest for `tag`, along with the raw body it was parsed from.
    pub async fn get_manifest(&mut self, tag: &str) -> Result<(Manifest, String), RegistryError> {
        let url = self
            .registry
            .url(&format!("/v2/{}/manifests/{}", self.repository, tag));
        log::debug!("Getting manifest at URL {}", url);

        let body = self
            .send(Method::GET, &url, Some(MANIFEST_V1_MEDIA_TYPE))
            .await?
            .text()
            .await?;
        let manifest = Manifest::parse_str(&body)?;

        Ok((manifest, body))
    }

    /// Compressed size of one blob, read from the headers of a HEAD probe.
    /// A 429 opens the shared cooldown window.
    pub async fn blob_size(&mut self, blob_sum: &str) -> Result<i64, RegistryError> {
        if self.registry.rate_limiter.is_limited() {
            return Err(RegistryError::RateLimited);
        }

        let url = self
            .registry
            .url(&format!("/v2/{}/blobs/{}", self.repository, blob_sum));
        log::debug!("Getting blob at URL {}", url);

        let response = match self.send(Method::HEAD, &url, None).await {
            Ok(response) => response,
            Err(RegistryError::RateLimited) => {
                self.registry.rate_limiter.trigger_limit();
                return Err(RegistryError::RateLimited);
            }
            Err(e) => return Err(e),
        };

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| RegistryError::InvalidContentLength(blob_sum.to_string()))
    }

    /// Total download size plus one size per layer in manifest order. A blob
    /// already counted for an earlier layer contributes 0. Any probe failure
    /// aborts the whole computation.
    pub async fn compute_download_size(
        &mut self,
        manifest: &Manifest,
    ) -> Result<(i64, Vec<i64>), RegistryError> {
        if self.registry.rate_limiter.is_limited() {
            return Err(RegistryError::RateLimited);
        }

        let mut blobs: HashMap<String, i64> = HashMap::new();
        let mut layer_sizes = Vec::with_capacity(manifest.fs_layers.len());
        let mut total = 0i64;

        for layer in &manifest.fs_layers {
            if blobs.contains_key(&layer.blob_sum) {
                layer_sizes.push(0);
                continue;
            }

            let size = self.blob_size(&layer.blob_sum).await.map_err(|e| {
                log::info!(
                    "Error getting blob size for image {} blob {}: {}",
                    self.repository,
                    layer.blob_sum,
                    e
                );
                e
            })?;

            blobs.insert(layer.blob_sum.clone(), size);
            layer_sizes.push(size);
            total += size;
        }

        Ok((total, layer_sizes))
    }
}
