use crate::activation::{ActivationWorkflow, Outcome, SkipReason};
use crate::error::WorkflowError;
use crate::geo_query::Coordinate;
use crate::planet::ImageryApi;
use crate::progress::Progress;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 1;

/// What happened to each coordinate of a batch. Order follows completion, not input.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub linked: Vec<(Coordinate, Url)>,
    pub skipped: Vec<(Coordinate, SkipReason)>,
    pub failed: Vec<(Coordinate, WorkflowError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.linked.len() + self.skipped.len() + self.failed.len()
    }

    fn record(&mut self, coord: Coordinate, result: Result<Outcome, WorkflowError>) {
        match result {
            Ok(Outcome::Linked(link)) => self.linked.push((coord, link)),
            Ok(Outcome::Skipped(reason)) => self.skipped.push((coord, reason)),
            Err(e) => {
                warn!(
                    latitude = coord.latitude,
                    longitude = coord.longitude,
                    error = %e,
                    "Coordinate failed"
                );
                self.failed.push((coord, e));
            }
        }
    }
}

/// Runs one activation workflow per coordinate with at most `concurrency` in flight.
///
/// Failures stay with their coordinate in the report; the rest of the batch keeps
/// going. Once the workflow's cancellation token fires, coordinates that have not
/// started are reported as cancelled.
pub async fn process_all<A: ImageryApi>(
    workflow: Arc<ActivationWorkflow<A>>,
    coordinates: Vec<Coordinate>,
    size_px: u32,
    res_per_px: f64,
    concurrency: usize,
    progress: Arc<Progress>,
) -> BatchReport {
    let mut report = BatchReport::default();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let cancel = workflow.cancel_token().clone();
    let mut tasks = JoinSet::new();

    info!(
        coordinates = coordinates.len(),
        concurrency, "Starting activation batch"
    );

    for coord in coordinates {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            report.record(coord, Err(WorkflowError::Cancelled));
            progress.tick();
            continue;
        };

        let workflow = workflow.clone();
        let progress = progress.clone();
        tasks.spawn(async move {
            let result = workflow.run(coord, size_px, res_per_px).await;
            drop(permit);
            progress.tick();
            (coord, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((coord, result)) => report.record(coord, result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!(error = %e, "Workflow task did not finish"),
        }
    }

    info!(
        linked = report.linked.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Activation batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::PollPolicy;
    use crate::geo_query::SearchWindow;
    use crate::link_sink::{read_links, LinkSink};
    use crate::testing::FakeApi;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn setup(api: FakeApi) -> (Arc<ActivationWorkflow<FakeApi>>, Arc<LinkSink>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LinkSink::open(dir.path().join("links.txt")).await.unwrap());
        let poll = PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Some(Duration::from_secs(5)),
        };
        let workflow = ActivationWorkflow::new(
            Arc::new(api),
            sink.clone(),
            SearchWindow::default(),
            "PSScene",
            poll,
            CancellationToken::new(),
        );
        (Arc::new(workflow), sink, dir)
    }

    fn coordinates(count: usize) -> Vec<Coordinate> {
        (0..count)
            .map(|i| Coordinate::new(i as f64, 10.0 + i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_batch_is_reported_per_coordinate() {
        let api = FakeApi::new(&["ortho_analytic_4b"]).empty_at(1.0).failing_at(3.0);
        let (workflow, sink, _dir) = setup(api).await;
        let progress = Arc::new(Progress::hidden(5));

        let report = process_all(workflow, coordinates(5), 512, 3.0, 2, progress.clone()).await;

        assert_eq!(report.total(), 5);
        assert_eq!(report.linked.len(), 3);
        assert_eq!(report.skipped, vec![(Coordinate::new(1.0, 11.0), SkipReason::NoCandidates)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, Coordinate::new(3.0, 13.0));
        assert!(matches!(report.failed[0].1, WorkflowError::Transport(_)));
        assert_eq!(progress.completed(), 5);

        let mut written = read_links(sink.path()).await.unwrap();
        let mut linked: Vec<_> = report.linked.into_iter().map(|(_, url)| url).collect();
        written.sort();
        linked.sort();
        assert_eq!(written, linked);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let api = FakeApi::new(&["ortho_analytic_4b"]).with_delay(Duration::from_millis(20));
        let (workflow, _sink, _dir) = setup(api).await;

        let report = process_all(
            workflow.clone(),
            coordinates(12),
            512,
            3.0,
            3,
            Arc::new(Progress::hidden(12)),
        )
        .await;

        assert_eq!(report.linked.len(), 12);
        let api = workflow.api();
        assert!(api.max_in_flight() <= 3);
        assert!(api.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_default_concurrency_is_sequential() {
        let api = FakeApi::new(&["ortho_analytic_4b"]).with_delay(Duration::from_millis(5));
        let (workflow, _sink, _dir) = setup(api).await;

        process_all(
            workflow.clone(),
            coordinates(4),
            512,
            3.0,
            DEFAULT_CONCURRENCY,
            Arc::new(Progress::hidden(4)),
        )
        .await;
        assert_eq!(workflow.api().max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_remaining_coordinates() {
        let api = FakeApi::new(&["ortho_analytic_4b"]);
        let (workflow, sink, _dir) = setup(api).await;
        workflow.cancel_token().cancel();
        let progress = Arc::new(Progress::hidden(3));

        let report = process_all(workflow, coordinates(3), 512, 3.0, 1, progress.clone()).await;

        assert_eq!(report.failed.len(), 3);
        assert!(report
            .failed
            .iter()
            .all(|(_, e)| matches!(e, WorkflowError::Cancelled)));
        assert_eq!(progress.completed(), 3);
        assert!(read_links(sink.path()).await.unwrap().is_empty());
    }
}
