use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use conduit_shields::CredentialManager;
use reqwest::Method;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpRequest, HttpResponse};

const NEGOTIATE: &str = "Negotiate";

/// How bearer tokens are obtained from a service's `/token` endpoint
#[derive(Clone)]
pub enum Authenticator {
    /// Single-round mutual authentication with the process credential
    Negotiate(Arc<CredentialManager>),
    /// A static username and password
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negotiate(manager) => f.debug_tuple("Negotiate").field(manager).finish(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl Authenticator {
    /// Exchange our identity for a bearer token valid at `base`
    pub async fn token_for(&self, backend: &dyn HttpBackend, base: &Url) -> Result<String> {
        let url = base.join("/token")?;
        debug!(%url, "requesting token");

        let token = match self {
            Self::Negotiate(manager) => negotiate(manager, backend, base, url).await?,
            Self::Basic { username, password } => {
                let creds = BASE64.encode(format!("{username}:{password}"));
                let request = HttpRequest::new(Method::POST, url.clone())
                    .header("Authorization", format!("Basic {creds}"));
                let response = backend.execute(request).await?;
                check_status(&url, &response)?;
                token_from_body(&response)?
            }
        };

        info!(%base, "obtained token");
        Ok(token)
    }
}

async fn negotiate(
    manager: &Arc<CredentialManager>,
    backend: &dyn HttpBackend,
    base: &Url,
    url: Url,
) -> Result<String> {
    let host = base
        .host_str()
        .ok_or_else(|| Error::custom(format!("no host in {base}")))?;
    let (handshake, initial) = manager.initiate_blocking(&format!("HTTP@{host}")).await?;

    let request = HttpRequest::new(Method::POST, url.clone())
        .header("Authorization", format!("{NEGOTIATE} {}", BASE64.encode(initial)));
    let response = backend.execute(request).await?;
    check_status(&url, &response)?;

    let challenge = response
        .header("WWW-Authenticate")
        .and_then(parse_negotiate)
        .ok_or_else(|| Error::BadTokenResponse("missing or invalid Negotiate challenge".into()))?;
    handshake.finish(challenge).await?;

    token_from_body(&response)
}

fn check_status(url: &Url, response: &HttpResponse) -> Result<()> {
    if response.status == 200 {
        Ok(())
    } else {
        Err(Error::TokenRequest {
            url: url.clone(),
            status: response.status,
        })
    }
}

/// Decode `Negotiate <base64>`
fn parse_negotiate(header: &str) -> Option<Vec<u8>> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(NEGOTIATE) {
        return None;
    }
    BASE64.decode(token.trim()).ok()
}

fn token_from_body(response: &HttpResponse) -> Result<String> {
    response
        .json()
        .as_ref()
        .and_then(|body| body.get("token"))
        .and_then(|token| token.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::BadTokenResponse("no token in response body".into()))
}
