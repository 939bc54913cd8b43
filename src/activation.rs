//! Per-coordinate workflow: search, pick an ortho analytic asset, activate it
//! and wait until the provider hands out a download location.
//!
//! ```text
//! Searching -> CandidateFound -> AssetDiscovered -> AlreadyActive | Activating
//!           -> Active -> LinkEmitted
//! ```
//!
//! An empty search or an item without any eligible asset ends the run with
//! [`Outcome::Skipped`]; those are expected results, not errors.
use crate::error::{TransportError, WorkflowError};
use crate::geo_query::{bounding_box, build_search_filter, Coordinate, SearchRequest, SearchWindow};
use crate::link_sink::LinkSink;
use crate::planet::{
    Asset, AssetKey, AssetKind, AssetState, AssetStatus, ImageCandidate, ImageryApi,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the asset is active or the run is cancelled.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoCandidates,
    NoEligibleAsset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Linked(Url),
    Skipped(SkipReason),
}

/// First asset kind, in preference order, present in the listing.
pub fn select_eligible_asset(status: &AssetStatus) -> Option<(AssetKind, &Asset)> {
    AssetKind::PREFERENCE
        .iter()
        .find_map(|kind| status.get(kind).map(|asset| (*kind, asset)))
}

pub struct ActivationWorkflow<A> {
    api: Arc<A>,
    sink: Arc<LinkSink>,
    window: SearchWindow,
    item_type: String,
    poll: PollPolicy,
    cancel: CancellationToken,
}

impl<A: ImageryApi> ActivationWorkflow<A> {
    pub fn new(
        api: Arc<A>,
        sink: Arc<LinkSink>,
        window: SearchWindow,
        item_type: &str,
        poll: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            sink,
            window,
            item_type: item_type.to_string(),
            poll,
            cancel,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn guarded<T>(
        &self,
        request: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, WorkflowError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
            result = request => result.map_err(WorkflowError::from),
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ImageCandidate>, WorkflowError> {
        self.guarded(self.api.quick_search(request)).await
    }

    pub async fn fetch_asset_status(
        &self,
        candidate: &ImageCandidate,
    ) -> Result<AssetStatus, WorkflowError> {
        self.guarded(self.api.item_assets(&self.item_type, &candidate.id))
            .await
    }

    /// Requests activation unless the asset is already active. Repeating the
    /// request for an asset that is still activating is harmless.
    pub async fn activate(&self, kind: AssetKind, asset: &Asset) -> Result<(), WorkflowError> {
        if asset.status == AssetState::Active {
            debug!(asset = kind.key(), "Asset already active");
            return Ok(());
        }
        let link = asset
            .links
            .activate
            .as_ref()
            .ok_or_else(|| WorkflowError::MissingLink {
                asset: kind.key().to_string(),
                link: "activate",
            })?;
        debug!(asset = kind.key(), status = ?asset.status, "Requesting activation");
        self.guarded(self.api.activate(link)).await
    }

    /// Polls the asset's `_self` link at a fixed interval until it reports
    /// `active`, then returns its download location.
    pub async fn await_active(&self, kind: AssetKind, asset: &Asset) -> Result<Url, WorkflowError> {
        let self_link = &asset.links.self_link;
        let started = Instant::now();
        loop {
            let poll = self.guarded(self.api.asset_state(self_link)).await?;
            if poll.status == AssetState::Active {
                return poll.location.ok_or_else(|| WorkflowError::MissingLink {
                    asset: kind.key().to_string(),
                    link: "location",
                });
            }

            let waited = started.elapsed();
            let mut pause = self.poll.interval;
            if let Some(max_wait) = self.poll.max_wait {
                if waited >= max_wait {
                    return Err(WorkflowError::Timeout {
                        url: self_link.clone(),
                        waited,
                    });
                }
                pause = pause.min(max_wait - waited);
            }
            debug!(asset = kind.key(), status = ?poll.status, ?waited, "Waiting for activation");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    #[instrument(skip(self), fields(coordinate = %coord))]
    pub async fn run(
        &self,
        coord: Coordinate,
        size_px: u32,
        res_per_px: f64,
    ) -> Result<Outcome, WorkflowError> {
        let bbox = bounding_box(coord, size_px, res_per_px);
        let filter = build_search_filter(
            bbox,
            self.window.start_date,
            self.window.end_date,
            self.window.max_cloud,
        );
        let request = SearchRequest::new(&self.item_type, filter);

        let candidates = self.search(&request).await?;
        let Some(candidate) = candidates.first() else {
            info!("No images found");
            return Ok(Outcome::Skipped(SkipReason::NoCandidates));
        };
        debug!(item = %candidate.id, found = candidates.len(), "Using first candidate");

        let status = self.fetch_asset_status(candidate).await?;
        let Some((kind, asset)) = select_eligible_asset(&status) else {
            info!(item = %candidate.id, "Could not find any valid asset");
            return Ok(Outcome::Skipped(SkipReason::NoEligibleAsset));
        };

        self.activate(kind, asset).await?;
        let link = self.await_active(kind, asset).await?;
        self.sink.append(&link).await?;
        info!(item = %candidate.id, asset = kind.key(), "Download link ready");
        Ok(Outcome::Linked(link))
    }
}
