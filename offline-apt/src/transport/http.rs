// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching over HTTP.

Uses a blocking [reqwest] client. Proxies come from `<scheme>_proxy` environment
variables and, optionally, an explicitly configured proxy with basic credentials.
*/

use {
    crate::{
        config::ProxyConfig,
        error::{OfflineAptError, Result},
        transport::{
            copy_with_progress, open_destination, plan_resume, FetchOutcome, FetchProgress,
            Fetcher, LocalState, RemoteState, ResumeAction,
        },
    },
    log::{debug, warn},
    reqwest::{
        blocking::{Client, ClientBuilder, RequestBuilder, Response},
        header::{HeaderMap, CONTENT_LENGTH, LAST_MODIFIED, RANGE},
        StatusCode,
    },
    std::{
        path::Path,
        time::{Duration, SystemTime},
    },
    url::Url,
};

/// Attempts made when a proxy demands authentication.
const PROXY_ATTEMPTS: usize = 2;

/// Obtain an HTTP client, taking proxy environment variables into account.
///
/// An explicit proxy takes precedence over the environment.
pub fn get_http_client(proxy: Option<&ProxyConfig>) -> Result<Client> {
    let mut builder = ClientBuilder::new();

    for (key, value) in std::env::vars() {
        let key = key.to_lowercase();
        if key.ends_with("_proxy") {
            let end = key.len() - "_proxy".len();
            let schema = &key[..end];

            if let Ok(url) = Url::parse(&value) {
                if let Some(proxy) = match schema {
                    "http" => Some(reqwest::Proxy::http(url.as_str())),
                    "https" => Some(reqwest::Proxy::https(url.as_str())),
                    _ => None,
                } {
                    if let Ok(proxy) = proxy {
                        builder = builder.proxy(proxy);
                    }
                }
            }
        }
    }

    if let Some(config) = proxy {
        let mut proxy = reqwest::Proxy::all(config.url.as_str())?;

        if let Some(username) = &config.username {
            proxy = proxy.basic_auth(username, config.password.as_deref().unwrap_or(""));
        }

        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn header_time(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(LAST_MODIFIED)?.to_str().ok()?;

    match mailparse::dateparse(value) {
        Ok(seconds) if seconds >= 0 => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds as u64))
        }
        Ok(_) => None,
        Err(e) => {
            debug!("ignoring unparsable Last-Modified {}: {}", value, e);
            None
        }
    }
}

/// A [Fetcher] for `http://` and `https://` URLs.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Construct an instance honoring proxy environment variables.
    pub fn new() -> Result<Self> {
        Self::with_proxy(None)
    }

    /// Construct an instance using an explicit proxy.
    pub fn with_proxy(proxy: Option<&ProxyConfig>) -> Result<Self> {
        Ok(Self {
            client: get_http_client(proxy)?,
        })
    }

    /// Send a request, retrying once if the proxy wants authentication.
    fn send(&self, url: &str, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response> {
        for attempt in 1..=PROXY_ATTEMPTS {
            let response = build(&self.client).send()?;

            if response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                warn!(
                    "proxy authentication required for {} (attempt {} of {})",
                    url, attempt, PROXY_ATTEMPTS
                );
                continue;
            }

            return Ok(response);
        }

        Err(OfflineAptError::ProxyAuthentication(url.to_string()))
    }

    fn remote_state(&self, url: &str) -> Result<RemoteState> {
        let response = self.send(url, |c| c.head(url))?;

        if !response.status().is_success() {
            return Err(OfflineAptError::HttpStatus(
                url.to_string(),
                response.status().as_u16(),
            ));
        }

        Ok(RemoteState {
            length: header_u64(response.headers(), CONTENT_LENGTH),
            last_modified: header_time(response.headers()),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn exists(&self, url: &str) -> Result<bool> {
        let response = self.send(url, |c| c.head(url))?;

        debug!("HEAD {} -> {}", url, response.status());

        Ok(response.status().is_success())
    }

    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        label: &str,
        progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<FetchOutcome> {
        let local = LocalState::from_path(destination)?;
        let remote = self.remote_state(url)?;

        let offset = match plan_resume(local, &remote) {
            ResumeAction::Complete => {
                let bytes = local.map(|l| l.size).unwrap_or(0);
                progress(FetchProgress {
                    label,
                    downloaded: bytes,
                    total: Some(bytes),
                });
                return Ok(FetchOutcome::Hit { bytes });
            }
            ResumeAction::FromStart => 0,
            ResumeAction::Resume(offset) => offset,
        };

        let response = self.send(url, |c| {
            if offset > 0 {
                c.get(url).header(RANGE, format!("bytes={}-", offset))
            } else {
                c.get(url)
            }
        })?;

        let start = match response.status() {
            StatusCode::PARTIAL_CONTENT => offset,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                debug!("{} already complete at {} bytes", url, offset);
                return Ok(FetchOutcome::Hit { bytes: offset });
            }
            status if status.is_success() => {
                if offset > 0 {
                    debug!("server ignored range request for {}; starting over", url);
                }
                0
            }
            status => {
                return Err(OfflineAptError::HttpStatus(
                    url.to_string(),
                    status.as_u16(),
                ))
            }
        };

        let total = header_u64(response.headers(), CONTENT_LENGTH).map(|l| l + start);
        let mut fh = open_destination(destination, start > 0)?;

        let bytes = copy_with_progress(response, &mut fh, start, total, label, progress)?;

        Ok(FetchOutcome::Downloaded { bytes })
    }
}
