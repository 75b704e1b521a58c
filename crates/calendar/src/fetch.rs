//! Bounded HTTP fetch for ICS feeds.

use std::time::Duration;

use {async_trait::async_trait, tracing::debug, url::Url};

use crate::{Error, Result};

/// Downloads raw calendar text.
#[async_trait]
pub trait IcsFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain GET with a redirect hop cap and a body size cap. Redirects are
/// followed by hand so every hop is counted and loops are caught.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    max_redirects: u8,
}

impl HttpFetcher {
    pub fn new(max_bytes: usize, max_redirects: u8, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("medbot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_bytes,
            max_redirects,
        })
    }
}

#[async_trait]
impl IcsFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let mut current = normalize_url(url)?;
        let mut visited: Vec<Url> = Vec::new();
        let mut hops = 0u8;

        loop {
            visited.push(current.clone());
            let mut resp = self.client.get(current.as_str()).send().await?;
            let status = resp.status();

            if status.is_redirection() {
                if hops >= self.max_redirects {
                    return Err(Error::TooManyRedirects {
                        max: self.max_redirects,
                    });
                }
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::message("redirect without Location header"))?;
                let next = current.join(location)?;
                if visited.contains(&next) {
                    return Err(Error::message(format!(
                        "redirect loop detected: {current} -> {next}"
                    )));
                }
                debug!(from = %current, to = %next, "following redirect");
                current = next;
                hops += 1;
                continue;
            }

            if !status.is_success() {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    url: current.to_string(),
                });
            }

            if resp
                .content_length()
                .is_some_and(|len| len > self.max_bytes as u64)
            {
                return Err(Error::TooLarge {
                    limit: self.max_bytes,
                });
            }

            // Content-Length may be absent or wrong, so count while streaming.
            let mut body: Vec<u8> = Vec::new();
            while let Some(chunk) = resp.chunk().await? {
                if body.len() + chunk.len() > self.max_bytes {
                    return Err(Error::TooLarge {
                        limit: self.max_bytes,
                    });
                }
                body.extend_from_slice(&chunk);
            }

            return Ok(String::from_utf8_lossy(&body).into_owned());
        }
    }
}

/// Parse and check the scheme; `webcal://` feeds are fetched over HTTPS.
fn normalize_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    const WEBCAL: &str = "webcal://";
    let url = match trimmed.get(..WEBCAL.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(WEBCAL) => {
            Url::parse(&format!("https://{}", &trimmed[WEBCAL.len()..]))?
        },
        _ => Url::parse(trimmed)?,
    };
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::UnsupportedScheme {
            scheme: scheme.to_string(),
        }),
    }
}
