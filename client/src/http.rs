//! HTTP transport for the remote sync endpoints.

use crate::config::Config;
use crate::error::{AppError, Result as AppResult};
use magsync_engine::{
    CollectionResponse, CollectionVersionMap, Error, Record, RemoteState, Result, StateResponse,
    UpdateOperation,
};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// [`RemoteState`] backed by the site's JSON endpoints.
///
/// - `GET {site}/api/_sync/state/{app}/`
/// - `GET {site}/api/{collection}/`
/// - `GET {site}/api/_sync/update/{collection}/{since}/`
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    site_url: Url,
    app: String,
}

impl HttpRemote {
    /// Build a transport; `session_cookie` is sent as the `Cookie` header.
    pub fn new(
        site_url: &str,
        app: &str,
        timeout: Duration,
        session_cookie: Option<&str>,
    ) -> AppResult<Self> {
        let site_url = Url::parse(site_url)
            .map_err(|err| AppError::InvalidSiteUrl(format!("{site_url}: {err}")))?;
        if site_url.cannot_be_a_base() {
            return Err(AppError::InvalidSiteUrl(site_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let mut value = HeaderValue::from_str(cookie)?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            site_url,
            app: app.to_string(),
        })
    }

    /// Build a transport from the loaded configuration.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            &config.site_url,
            &config.app,
            config.timeout,
            config.session_cookie.as_deref(),
        )
    }

    fn state_url(&self) -> Result<Url> {
        self.endpoint(&["_sync", "state", self.app.as_str()])
    }

    fn collection_url(&self, collection: &str) -> Result<Url> {
        self.endpoint(&[collection])
    }

    fn updates_url(&self, collection: &str, since: &str) -> Result<Url> {
        self.endpoint(&["_sync", "update", collection, since])
    }

    /// `{site}/api/{segments..}/`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        // Dot segments would be dropped rather than encoded
        if let Some(segment) = segments
            .iter()
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            return Err(Error::InvalidRequest(format!(
                "unusable path segment {:?}",
                segment
            )));
        }

        let mut url = self.site_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidRequest(format!("{} cannot be a base", self.site_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments)
            .push("");
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!(%url, "GET");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| Error::RemoteUnreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::InvalidResponse(format!("{} returned {}", url, status)));
        }

        response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(format!("{}: {}", url, err)))
    }
}

impl RemoteState for HttpRemote {
    async fn fetch_state(&self) -> Result<CollectionVersionMap> {
        let body: StateResponse = self.get_json(self.state_url()?).await?;
        Ok(body.state)
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Record>> {
        let body: CollectionResponse = self.get_json(self.collection_url(collection)?).await?;
        Ok(body.results)
    }

    async fn fetch_updates(&self, collection: &str, since: &str) -> Result<Vec<UpdateOperation>> {
        self.get_json(self.updates_url(collection, since)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(site_url: &str) -> HttpRemote {
        HttpRemote::new(site_url, "library", Duration::from_secs(5), None).unwrap()
    }

    #[test]
    fn endpoint_urls() {
        let remote = remote("http://example.org/");

        assert_eq!(
            remote.state_url().unwrap().as_str(),
            "http://example.org/api/_sync/state/library/"
        );
        assert_eq!(
            remote.collection_url("author").unwrap().as_str(),
            "http://example.org/api/author/"
        );
        assert_eq!(
            remote.updates_url("author", "v3").unwrap().as_str(),
            "http://example.org/api/_sync/update/author/v3/"
        );
    }

    #[test]
    fn site_path_prefix_is_kept() {
        let remote = remote("https://example.org/mag");
        assert_eq!(
            remote.collection_url("author").unwrap().as_str(),
            "https://example.org/mag/api/author/"
        );
    }

    #[test]
    fn tokens_are_percent_encoded() {
        let remote = remote("http://example.org");

        assert_eq!(
            remote
                .updates_url("author", "v1/../../x?y=1#z")
                .unwrap()
                .as_str(),
            "http://example.org/api/_sync/update/author/v1%2F..%2F..%2Fx%3Fy=1%23z/"
        );
        assert!(matches!(
            remote.updates_url("author", ".."),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            remote.updates_url("author", ""),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_bad_site_url() {
        let result = HttpRemote::new("example.org", "library", Duration::from_secs(5), None);
        assert!(matches!(result, Err(AppError::InvalidSiteUrl(_))));
    }

    #[test]
    fn rejects_unencodable_cookie() {
        let result = HttpRemote::new(
            "http://example.org",
            "library",
            Duration::from_secs(5),
            Some("session\nid"),
        );
        assert!(matches!(result, Err(AppError::InvalidCookie(_))));
    }
}
