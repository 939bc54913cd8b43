//! In-memory stand-ins for the provider and image host.
use crate::error::TransportError;
use crate::geo_query::SearchRequest;
use crate::planet::{
    Asset, AssetLinks, AssetPoll, AssetState, AssetStatus, ByteStream, ImageCandidate,
    ImageSource, ImageryApi,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

const FAKE_HOST: &str = "https://fake.test";

fn fake_url(path: &str) -> Url {
    Url::parse(&format!("{FAKE_HOST}{path}")).unwrap()
}

/// Latitude carried by the closing vertex of the request's polygon.
pub fn latitude_of(request: &SearchRequest) -> f64 {
    let json = serde_json::to_value(request).unwrap();
    json["filter"]["config"][0]["config"]["coordinates"][0][4][0]
        .as_f64()
        .unwrap()
}

struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        }
    }

    async fn hold(&self, delay: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct FakeApi {
    candidates: Vec<String>,
    kinds: Vec<&'static str>,
    initial: AssetState,
    polls_until_active: usize,
    empty_at: Vec<f64>,
    failing_at: Vec<f64>,
    delay: Duration,
    in_flight: InFlight,
    pub searches: AtomicUsize,
    pub activations: AtomicUsize,
    pub polls: AtomicUsize,
}

impl FakeApi {
    pub fn new(kinds: &[&'static str]) -> Self {
        Self {
            candidates: vec!["item-a".to_string(), "item-b".to_string()],
            kinds: kinds.to_vec(),
            initial: AssetState::Inactive,
            polls_until_active: 0,
            empty_at: vec![],
            failing_at: vec![],
            delay: Duration::ZERO,
            in_flight: InFlight::new(),
            searches: AtomicUsize::new(0),
            activations: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_initial(mut self, state: AssetState) -> Self {
        self.initial = state;
        self
    }

    pub fn with_polls_until_active(mut self, polls: usize) -> Self {
        self.polls_until_active = polls;
        self
    }

    pub fn with_no_candidates(mut self) -> Self {
        self.candidates.clear();
        self
    }

    pub fn empty_at(mut self, latitude: f64) -> Self {
        self.empty_at.push(latitude);
        self
    }

    pub fn failing_at(mut self, latitude: f64) -> Self {
        self.failing_at.push(latitude);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.max()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl ImageryApi for FakeApi {
    async fn quick_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ImageCandidate>, TransportError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.in_flight.hold(self.delay).await;
        let latitude = latitude_of(request);
        if self.failing_at.contains(&latitude) {
            return Err(TransportError::Status {
                url: fake_url("/quick-search"),
                status: 503,
            });
        }
        if self.empty_at.contains(&latitude) {
            return Ok(vec![]);
        }
        Ok(self
            .candidates
            .iter()
            .map(|id| ImageCandidate {
                id: format!("{id}_{latitude}"),
            })
            .collect())
    }

    async fn item_assets(
        &self,
        _item_type: &str,
        item_id: &str,
    ) -> Result<AssetStatus, TransportError> {
        let assets = self
            .kinds
            .iter()
            .map(|kind| {
                let self_link = fake_url(&format!("/assets/{item_id}/{kind}"));
                let location = (self.initial == AssetState::Active)
                    .then(|| fake_url(&format!("/download/{item_id}/{kind}")));
                let asset = Asset {
                    status: self.initial.clone(),
                    links: AssetLinks {
                        activate: Some(fake_url(&format!("/activate/{item_id}/{kind}"))),
                        self_link,
                    },
                    location,
                };
                (kind.to_string(), asset)
            })
            .collect::<HashMap<_, _>>();
        Ok(AssetStatus(assets))
    }

    async fn activate(&self, _link: &Url) -> Result<(), TransportError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn asset_state(&self, self_link: &Url) -> Result<AssetPoll, TransportError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.initial == AssetState::Active || polls > self.polls_until_active {
            let location = Url::parse(&self_link.as_str().replace("/assets/", "/download/")).unwrap();
            return Ok(AssetPoll {
                status: AssetState::Active,
                location: Some(location),
            });
        }
        Ok(AssetPoll {
            status: AssetState::Activating,
            location: None,
        })
    }
}

pub struct FakeSource {
    payload: Vec<u8>,
    failing: Vec<String>,
    interrupted: Vec<String>,
    stalled: Vec<(String, usize)>,
    delay: Duration,
    in_flight: InFlight,
    pub opened: AtomicUsize,
}

impl FakeSource {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            failing: vec![],
            interrupted: vec![],
            stalled: vec![],
            delay: Duration::ZERO,
            in_flight: InFlight::new(),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, url: &Url) -> Self {
        self.failing.push(url.to_string());
        self
    }

    pub fn interrupted(mut self, url: &Url) -> Self {
        self.interrupted.push(url.to_string());
        self
    }

    /// Serves `chunks` chunks of the body and then never yields again.
    pub fn stalled(mut self, url: &Url, chunks: usize) -> Self {
        self.stalled.push((url.to_string(), chunks));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.max()
    }
}

impl ImageSource for FakeSource {
    async fn open(&self, url: &Url) -> Result<ByteStream, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.in_flight.hold(self.delay).await;
        if self.failing.contains(&url.to_string()) {
            return Err(TransportError::Status {
                url: url.clone(),
                status: 500,
            });
        }
        let mut chunks: Vec<Result<Bytes, TransportError>> = self
            .payload
            .chunks(4)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if self.interrupted.contains(&url.to_string()) {
            chunks.truncate(1);
            chunks.push(Err(TransportError::Stream {
                url: url.clone(),
                reason: "connection reset".to_string(),
            }));
        }
        if let Some((_, served)) = self.stalled.iter().find(|(u, _)| *u == url.as_str()) {
            chunks.truncate(*served);
            return Ok(stream::iter(chunks).chain(stream::pending()).boxed());
        }
        Ok(stream::iter(chunks).boxed())
    }
}

pub fn links(count: usize) -> Vec<Url> {
    (1..=count)
        .map(|i| fake_url(&format!("/download/item-{i}?token=t{i}")))
        .collect()
}
