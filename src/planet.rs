//! Planet Data API client and the trait seams the workflows are written against.
use crate::error::TransportError;
use crate::geo_query::SearchRequest;
use crate::settings::Credential;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.planet.com/data/v1/";

pub trait AssetKey {
    fn key(&self) -> &str;
}

/// Ortho analytic products, in the order they are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    OrthoAnalytic4b,
    OrthoAnalytic3b,
    OrthoAnalytic8b,
}

impl AssetKind {
    pub const PREFERENCE: [AssetKind; 3] = [
        AssetKind::OrthoAnalytic4b,
        AssetKind::OrthoAnalytic3b,
        AssetKind::OrthoAnalytic8b,
    ];
}

impl AssetKey for AssetKind {
    fn key(&self) -> &str {
        match self {
            Self::OrthoAnalytic4b => "ortho_analytic_4b",
            Self::OrthoAnalytic3b => "ortho_analytic_3b",
            Self::OrthoAnalytic8b => "ortho_analytic_8b",
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageCandidate {
    pub id: String,
}

#[derive(Deserialize, Debug)]
struct QuickSearchResponse {
    #[serde(default)]
    features: Vec<ImageCandidate>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Inactive,
    Activating,
    Active,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct AssetLinks {
    #[serde(rename = "_self")]
    pub self_link: Url,
    #[serde(default)]
    pub activate: Option<Url>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Asset {
    pub status: AssetState,
    #[serde(rename = "_links")]
    pub links: AssetLinks,
    #[serde(default)]
    pub location: Option<Url>,
}

/// Asset listing of one item, keyed by asset name.
///
/// Only the ortho analytic kinds have to be well formed. Other entries that do
/// not decode as an [`Asset`] are left out of the listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetStatus(pub HashMap<String, Asset>);

impl AssetStatus {
    pub fn get(&self, kind: &impl AssetKey) -> Option<&Asset> {
        self.0.get(kind.key())
    }
}

impl<'de> Deserialize<'de> for AssetStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut assets = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            let eligible = AssetKind::PREFERENCE.iter().any(|kind| kind.key() == name);
            match Asset::deserialize(value) {
                Ok(asset) => {
                    assets.insert(name, asset);
                }
                Err(e) if eligible => {
                    return Err(D::Error::custom(format!("asset '{name}': {e}")));
                }
                Err(e) => debug!(asset = %name, error = %e, "Ignoring unreadable asset"),
            }
        }
        Ok(Self(assets))
    }
}

/// What an asset's `_self` link reports while it is being provisioned.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct AssetPoll {
    pub status: AssetState,
    #[serde(default)]
    pub location: Option<Url>,
}

pub trait ImageryApi: Send + Sync + 'static {
    fn quick_search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<ImageCandidate>, TransportError>> + Send;

    fn item_assets(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> impl Future<Output = Result<AssetStatus, TransportError>> + Send;

    fn activate(&self, link: &Url) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn asset_state(
        &self,
        self_link: &Url,
    ) -> impl Future<Output = Result<AssetPoll, TransportError>> + Send;
}

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

pub trait ImageSource: Send + Sync + 'static {
    fn open(&self, url: &Url) -> impl Future<Output = Result<ByteStream, TransportError>> + Send;
}

pub struct PlanetClient {
    http: Client,
    credential: Credential,
    base_url: Url,
}

impl PlanetClient {
    pub fn new(
        base_url: Url,
        credential: Credential,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Self::with_http(http, base_url, credential)
    }

    fn with_http(http: Client, base_url: Url, credential: Credential) -> anyhow::Result<Self> {
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API url {} cannot be used as a base", base_url);
        }
        Ok(Self {
            http,
            credential,
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("Base url was checked on construction")
            .pop_if_empty()
            .extend(segments);
        url
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .basic_auth(self.credential.api_key(), Some(""))
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;
        check_status(url, response)
    }
}

fn check_status(url: &Url, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.clone(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })
}

impl ImageryApi for PlanetClient {
    async fn quick_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ImageCandidate>, TransportError> {
        let url = self.endpoint(&["quick-search"]);
        let response = self
            .send(&url, self.http.post(url.clone()).json(request))
            .await?;
        let result: QuickSearchResponse = decode(&url, response).await?;
        Ok(result.features)
    }

    async fn item_assets(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> Result<AssetStatus, TransportError> {
        let url = self.endpoint(&["item-types", item_type, "items", item_id, "assets"]);
        let response = self.send(&url, self.http.get(url.clone())).await?;
        decode(&url, response).await
    }

    async fn activate(&self, link: &Url) -> Result<(), TransportError> {
        self.send(link, self.http.get(link.clone())).await?;
        Ok(())
    }

    async fn asset_state(&self, self_link: &Url) -> Result<AssetPoll, TransportError> {
        let response = self.send(self_link, self.http.get(self_link.clone())).await?;
        decode(self_link, response).await
    }
}

/// Plain HTTP fetches of pre-signed download locations.
pub struct HttpImageSource {
    http: Client,
    response_timeout: Duration,
}

impl HttpImageSource {
    pub fn new(response_timeout: Duration) -> anyhow::Result<Self> {
        // No whole-request timeout, image bodies can take far longer than the first byte.
        let http = Client::builder().connect_timeout(response_timeout).build()?;
        Ok(Self {
            http,
            response_timeout,
        })
    }
}

impl ImageSource for HttpImageSource {
    async fn open(&self, url: &Url) -> Result<ByteStream, TransportError> {
        let pending = self.http.get(url.clone()).send();
        let response = tokio::time::timeout(self.response_timeout, pending)
            .await
            .map_err(|_| TransportError::TimedOut {
                url: url.clone(),
                after: self.response_timeout,
            })?
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;
        let response = check_status(url, response)?;

        let url = url.clone();
        let body = response
            .bytes_stream()
            .map_err(move |e| TransportError::Stream {
                url: url.clone(),
                reason: e.to_string(),
            })
            .boxed();
        Ok(body)
    }
}
