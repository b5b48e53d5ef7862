use std::time::Duration;

use hermes_hass_config::HomeAssistant;
use hermes_hass_kernel::HassRequest;
use reqwest::{Certificate, Client, Identity, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Token injected by the Home Assistant supervisor into add-on containers.
pub const HASSIO_TOKEN_ENV: &str = "HASSIO_TOKEN";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid home assistant url: {0}")]
    InvalidUrl(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Bearer(String),
    ApiPassword(String),
}

impl AuthHeader {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "Authorization",
            Self::ApiPassword(_) => "X-HA-Access",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Self::Bearer(token) => format!("Bearer {token}"),
            Self::ApiPassword(password) => password.clone(),
        }
    }
}

/// Picks the single auth header to send: access token, then API password,
/// then the supervisor token. Empty values count as unset.
pub fn select_auth(
    access_token: Option<&str>,
    api_password: Option<&str>,
    supervisor_token: Option<&str>,
) -> Option<AuthHeader> {
    let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
    present(access_token)
        .map(AuthHeader::Bearer)
        .or_else(|| present(api_password).map(AuthHeader::ApiPassword))
        .or_else(|| present(supervisor_token).map(AuthHeader::Bearer))
}

/// HTTP side of the bridge: posts built requests to Home Assistant.
pub struct HassClient {
    base_url: Url,
    access_token: Option<String>,
    api_password: Option<String>,
    client: Client,
}

impl HassClient {
    pub fn new(cfg: &HomeAssistant) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&cfg.url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {e}", cfg.url)))?;

        let mut builder = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms));
        if let Some(certfile) = &cfg.tls.certfile {
            let mut pem = read_pem(certfile)?;
            if let Some(keyfile) = &cfg.tls.keyfile {
                pem.push(b'\n');
                pem.extend(read_pem(keyfile)?);
            }
            let identity = Identity::from_pem(&pem)
                .map_err(|e| GatewayError::Tls(format!("client certificate {certfile}: {e}")))?;
            debug!(certfile = %certfile, "using client certificate");
            builder = builder.identity(identity);
        }
        // The bundle replaces the built-in roots.
        if let Some(verify_file) = &cfg.tls.verify_file {
            let certs = Certificate::from_pem_bundle(&read_pem(verify_file)?)
                .map_err(|e| GatewayError::Tls(format!("ca bundle {verify_file}: {e}")))?;
            if certs.is_empty() {
                return Err(GatewayError::Tls(format!(
                    "ca bundle {verify_file}: no certificates found"
                )));
            }
            debug!(verify_file = %verify_file, count = certs.len(), "trusting only ca bundle");
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder.build().map_err(|e| GatewayError::Tls(e.to_string()))?;

        Ok(Self {
            base_url,
            access_token: cfg.access_token.clone(),
            api_password: cfg.api_password.clone(),
            client,
        })
    }

    pub fn url_for(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}{path}: {e}", self.base_url)))
    }

    /// Resolved on every call so a rotated supervisor token is picked up.
    pub fn auth_header(&self) -> Option<AuthHeader> {
        let supervisor_token = std::env::var(HASSIO_TOKEN_ENV).ok();
        select_auth(
            self.access_token.as_deref(),
            self.api_password.as_deref(),
            supervisor_token.as_deref(),
        )
    }

    /// Posts `request`. Intent requests yield the decoded response body,
    /// event requests yield `None` once the server accepted them.
    pub async fn send(&self, request: &HassRequest) -> Result<Option<Value>, GatewayError> {
        let url = self.url_for(&request.path())?;
        let mut builder = self.client.post(url.clone()).json(&request.body());
        if let Some(auth) = self.auth_header() {
            builder = builder.header(auth.name(), auth.value());
        }

        debug!(%url, "posting to home assistant");
        let response = builder.send().await.map_err(|source| GatewayError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(GatewayError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !request.expects_response() {
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| GatewayError::Transport {
                url: url.to_string(),
                source,
            })?;
        let value = serde_json::from_slice(&body).map_err(|e| GatewayError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, GatewayError> {
    std::fs::read(path).map_err(|e| GatewayError::Tls(format!("read {path}: {e}")))
}
