//! Fetches the full rate surface for every mapped rating region and reports
//! which tasks could not be completed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use rand::seq::SliceRandom;
use ratewatch_core::{
    CarrierId, Jurisdiction, NormalizedRate, RatingParams, RatingRegion, normalize,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{FetchError, LocationIndex, QuoteSource};
use crate::config::{FetchPolicy, RatingAxes};
use crate::limiter::FetchLimiter;

/// Why a task ended without rates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error(transparent)]
    Fetch(FetchError),
    #[error("no quotes after {0} empty results")]
    EmptyExhausted(u32),
}

/// One unit of fetch work: a rating-parameter combination quoted at a
/// representative location, with same-grouping fallbacks for empty results.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub region_number: u32,
    pub params: RatingParams,
    /// Representative first, then fallback locations in try order.
    pub locations: Vec<String>,
}

/// A task that ended without rates, with enough context to re-run it.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub carrier: CarrierId,
    pub jurisdiction: Jurisdiction,
    pub region_number: u32,
    pub params: RatingParams,
    /// Last location tried.
    pub location: String,
    pub reason: FailureReason,
}

/// Result of a full fetch pass. Every task is accounted for: it either
/// contributed rates to `rates_by_region` or appears in `failures`.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub rates_by_region: BTreeMap<u32, Vec<NormalizedRate>>,
    pub failures: Vec<TaskFailure>,
}

enum TaskState {
    Pending,
    AwaitingResult,
    EmptyRetry(u32),
    HardFailRetry,
    Abandoned(FailureReason),
}

/// Drives the fetch workload for one carrier/jurisdiction across all its
/// rating regions, bounded by a shared request limiter.
pub struct FetchOrchestrator<'a> {
    source: &'a dyn QuoteSource,
    index: &'a dyn LocationIndex,
    limiter: Arc<FetchLimiter>,
    axes: RatingAxes,
    policy: FetchPolicy,
}

impl<'a> FetchOrchestrator<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        index: &'a dyn LocationIndex,
        limiter: Arc<FetchLimiter>,
        axes: RatingAxes,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            source,
            index,
            limiter,
            axes,
            policy,
        }
    }

    /// Quote every rating-parameter combination in every region, normalize
    /// the results, and return them grouped by region number. Runs every
    /// task to completion before returning.
    pub async fn fetch_all(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        regions: &[RatingRegion],
        effective_date: NaiveDate,
    ) -> FetchOutcome {
        let tasks = self.plan(carrier, jurisdiction, regions);
        info!(
            %carrier,
            %jurisdiction,
            regions = regions.len(),
            tasks = tasks.len(),
            "starting fetch pass"
        );

        let runs = tasks.into_iter().map(|task| async move {
            let result = self.run_task(carrier, jurisdiction, &task, effective_date).await;
            (task, result)
        });
        let results = join_all(runs).await;

        let mut outcome = FetchOutcome::default();
        for (task, result) in results {
            match result {
                Ok(rates) => outcome
                    .rates_by_region
                    .entry(task.region_number)
                    .or_default()
                    .extend(rates),
                Err((location, reason)) => {
                    warn!(
                        region = task.region_number,
                        params = %task.params,
                        %location,
                        error = %reason,
                        "fetch task abandoned"
                    );
                    outcome.failures.push(TaskFailure {
                        carrier,
                        jurisdiction: jurisdiction.clone(),
                        region_number: task.region_number,
                        params: task.params,
                        location,
                        reason,
                    });
                }
            }
        }
        info!(
            regions_with_rates = outcome.rates_by_region.len(),
            failures = outcome.failures.len(),
            "fetch pass complete"
        );
        outcome
    }

    /// Builds the task list: per region, per representative location, one
    /// task per rating-parameter combination. Fallback locations come from
    /// the representative's administrative grouping within the region.
    fn plan(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        regions: &[RatingRegion],
    ) -> Vec<FetchTask> {
        let combinations = self.axes.combinations(carrier, jurisdiction);
        let mut tasks = Vec::new();
        for region in regions {
            let mut members: Vec<String> = region.locations.iter().cloned().collect();
            members.shuffle(&mut rand::rng());
            for representative in members.iter().take(self.policy.representatives_per_region) {
                let locations = self.try_order(representative, &members);
                for params in &combinations {
                    tasks.push(FetchTask {
                        region_number: region.region_number,
                        params: params.clone(),
                        locations: locations.clone(),
                    });
                }
            }
        }
        tasks
    }

    /// Representative first, then the rest of its administrative grouping.
    fn try_order(&self, representative: &str, members: &[String]) -> Vec<String> {
        let group = self.index.grouping_of(representative);
        let mut order = vec![representative.to_string()];
        order.extend(
            members
                .iter()
                .filter(|m| m.as_str() != representative)
                .filter(|m| self.index.grouping_of(m) == group)
                .cloned(),
        );
        order
    }

    /// Runs one task to a terminal state. Transient failures retry the same
    /// location; a hard failure retries it once; empty results move to the
    /// next fallback location, up to the empty-retry budget.
    async fn run_task(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        task: &FetchTask,
        effective_date: NaiveDate,
    ) -> Result<Vec<NormalizedRate>, (String, FailureReason)> {
        let mut state = TaskState::Pending;
        let mut location_idx = 0;
        let mut empties = 0u32;
        let mut transients = 0u32;
        let mut hard_retried = false;

        loop {
            state = match state {
                TaskState::Pending
                | TaskState::EmptyRetry(_)
                | TaskState::HardFailRetry => TaskState::AwaitingResult,
                TaskState::AwaitingResult => {
                    let location = &task.locations[location_idx];
                    let result = {
                        let _permit = self.limiter.acquire().await;
                        self.source
                            .fetch_quote(jurisdiction, location, carrier, &task.params, effective_date)
                            .await
                    };
                    match result {
                        Ok(quotes) if quotes.iter().any(|q| q.carrier == carrier) => {
                            let rates = quotes
                                .iter()
                                .filter(|q| q.carrier == carrier)
                                .flat_map(normalize)
                                .collect();
                            return Ok(rates);
                        }
                        Ok(_) => {
                            empties += 1;
                            if empties >= self.policy.empty_retry_budget
                                || location_idx + 1 >= task.locations.len()
                            {
                                TaskState::Abandoned(FailureReason::EmptyExhausted(empties))
                            } else {
                                location_idx += 1;
                                TaskState::EmptyRetry(empties)
                            }
                        }
                        Err(err @ FetchError::Transient(_)) => {
                            transients += 1;
                            if transients >= self.policy.transient_retry_budget {
                                TaskState::Abandoned(FailureReason::Fetch(err))
                            } else {
                                TaskState::AwaitingResult
                            }
                        }
                        Err(err @ FetchError::Hard(_)) => {
                            if hard_retried {
                                TaskState::Abandoned(FailureReason::Fetch(err))
                            } else {
                                hard_retried = true;
                                TaskState::HardFailRetry
                            }
                        }
                    }
                }
                TaskState::Abandoned(reason) => {
                    return Err((task.locations[location_idx].clone(), reason));
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ratewatch_core::{AgeCurvePoint, Gender, RawQuote};

    use crate::config::LimiterConfig;
    use crate::index::StaticLocationIndex;

    /// Scripted source keyed by location. Each location holds a queue of
    /// responses consumed in order; the last entry repeats.
    struct SequencedSource {
        scripts: Mutex<HashMap<String, Vec<Result<Option<f64>, FetchError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl SequencedSource {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(self, location: &str, responses: Vec<Result<Option<f64>, FetchError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(location.to_string(), responses);
            self
        }

        fn calls_to(&self, location: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.as_str() == location)
                .count()
        }
    }

    #[async_trait]
    impl QuoteSource for SequencedSource {
        async fn fetch_quote(
            &self,
            _jurisdiction: &Jurisdiction,
            location: &str,
            carrier: CarrierId,
            params: &RatingParams,
            effective_date: NaiveDate,
        ) -> Result<Vec<RawQuote>, FetchError> {
            self.calls.lock().unwrap().push(location.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts
                .get_mut(location)
                .unwrap_or_else(|| panic!("no script for {location}"));
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            };
            match next {
                Ok(Some(rate)) => Ok(vec![RawQuote {
                    carrier,
                    params: params.clone(),
                    base_rate: rate,
                    age_curve: vec![AgeCurvePoint {
                        age_threshold: params.age,
                        multiplier: 1.0,
                    }],
                    discounts: vec![],
                    effective_date,
                }]),
                Ok(None) => Ok(vec![]),
                Err(err) => Err(err),
            }
        }
    }

    fn single_param_axes() -> RatingAxes {
        RatingAxes {
            ages: vec![65],
            genders: vec![Gender::Male],
            tobacco: vec![false],
            default_plans: vec!["G".to_string()],
            plan_overrides: HashMap::new(),
            plan_exclusions: std::collections::HashSet::new(),
        }
    }

    fn region(number: u32, locations: &[&str]) -> RatingRegion {
        RatingRegion {
            carrier: CarrierId(1),
            jurisdiction: Jurisdiction::new("TX"),
            region_number: number,
            grouping: ratewatch_core::GroupingMode::Fine,
            locations: locations.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn index_all_same_group(locations: &[&str]) -> StaticLocationIndex {
        let mut index = StaticLocationIndex::new();
        for location in locations {
            index.insert("TX", *location, "DALLAS");
        }
        index
    }

    fn orchestrator<'a>(
        source: &'a SequencedSource,
        index: &'a StaticLocationIndex,
        axes: RatingAxes,
    ) -> FetchOrchestrator<'a> {
        FetchOrchestrator::new(
            source,
            index,
            Arc::new(FetchLimiter::new(LimiterConfig::default())),
            axes,
            FetchPolicy::default(),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    #[tokio::test]
    async fn successful_fetch_groups_rates_by_region() {
        let source = SequencedSource::new()
            .script("75001", vec![Ok(Some(100.0))])
            .script("79901", vec![Ok(Some(120.0))]);
        let index = index_all_same_group(&["75001", "79901"]);
        let orch = orchestrator(&source, &index, single_param_axes());
        let regions = vec![region(0, &["75001"]), region(1, &["79901"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.rates_by_region.len(), 2);
        assert_eq!(outcome.rates_by_region[&0][0].rate, 100.0);
        assert_eq!(outcome.rates_by_region[&1][0].rate, 120.0);
    }

    #[tokio::test]
    async fn empty_result_falls_back_within_grouping() {
        let source = SequencedSource::new()
            .script("75001", vec![Ok(None)])
            .script("75002", vec![Ok(Some(101.0))]);
        let index = index_all_same_group(&["75001", "75002"]);
        let orch = orchestrator(&source, &index, single_param_axes());
        let regions = vec![region(0, &["75001", "75002"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.rates_by_region[&0][0].rate, 101.0);
        // Both locations were tried exactly once, in some order.
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_budget_exhaustion_is_reported() {
        let source = SequencedSource::new().script("75001", vec![Ok(None)]);
        let index = index_all_same_group(&["75001"]);
        let orch = orchestrator(&source, &index, single_param_axes());
        let regions = vec![region(0, &["75001"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        assert!(outcome.rates_by_region.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.region_number, 0);
        assert_eq!(failure.location, "75001");
        assert!(matches!(failure.reason, FailureReason::EmptyExhausted(_)));
    }

    #[tokio::test]
    async fn transient_failure_retries_same_location() {
        let source = SequencedSource::new().script(
            "75001",
            vec![
                Err(FetchError::Transient("timeout".to_string())),
                Err(FetchError::Transient("timeout".to_string())),
                Ok(Some(100.0)),
            ],
        );
        let index = index_all_same_group(&["75001"]);
        let orch = orchestrator(&source, &index, single_param_axes());
        let regions = vec![region(0, &["75001"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        assert!(outcome.failures.is_empty());
        assert_eq!(source.calls_to("75001"), 3);
    }

    #[tokio::test]
    async fn hard_failure_retries_once_then_abandons() {
        let source = SequencedSource::new().script(
            "75001",
            vec![Err(FetchError::Hard("bad request".to_string()))],
        );
        let index = index_all_same_group(&["75001"]);
        let orch = orchestrator(&source, &index, single_param_axes());
        let regions = vec![region(0, &["75001"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        assert_eq!(source.calls_to("75001"), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].reason,
            FailureReason::Fetch(FetchError::Hard(_))
        ));
    }

    #[tokio::test]
    async fn every_task_is_accounted_for() {
        let source = SequencedSource::new()
            .script("75001", vec![Ok(Some(100.0))])
            .script("79901", vec![Ok(None)]);
        let mut axes = single_param_axes();
        axes.ages = vec![65, 70];
        let index = index_all_same_group(&["75001", "79901"]);
        let orch = orchestrator(&source, &index, axes);
        let regions = vec![region(0, &["75001"]), region(1, &["79901"])];

        let outcome = orch
            .fetch_all(CarrierId(1), &Jurisdiction::new("TX"), &regions, date())
            .await;
        // Two combinations per region: region 0 succeeds both, region 1
        // fails both.
        let fetched: usize = outcome.rates_by_region.values().map(Vec::len).sum();
        assert_eq!(fetched, 2);
        assert_eq!(outcome.failures.len(), 2);
    }
}
