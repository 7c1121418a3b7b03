//! Tunable inputs for mapping, fetching, and rate limiting.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use ratewatch_core::{CarrierId, Gender, Jurisdiction, RatingParams};

/// The rating axes a carrier prices on, with per-jurisdiction plan overrides.
///
/// The Cartesian product of these axes defines the full fetch workload for
/// one rating region.
#[derive(Debug, Clone)]
pub struct RatingAxes {
    pub ages: Vec<u8>,
    pub genders: Vec<Gender>,
    pub tobacco: Vec<bool>,
    /// Plans quoted in jurisdictions without an override.
    pub default_plans: Vec<String>,
    /// Jurisdictions whose plan menu differs from the default.
    pub plan_overrides: HashMap<Jurisdiction, Vec<String>>,
    /// Carrier/jurisdiction/plan combinations known not to be sold.
    pub plan_exclusions: HashSet<(CarrierId, Jurisdiction, String)>,
}

impl Default for RatingAxes {
    fn default() -> Self {
        let mut plan_overrides = HashMap::new();
        plan_overrides.insert(
            Jurisdiction::new("MA"),
            vec!["MA_CORE".to_string(), "MA_SUPP1".to_string()],
        );
        plan_overrides.insert(
            Jurisdiction::new("MN"),
            vec!["MN_BASIC".to_string(), "MN_EXTB".to_string()],
        );
        plan_overrides.insert(Jurisdiction::new("WI"), vec!["WIR_A50%".to_string()]);
        Self {
            ages: vec![65, 70, 75, 80, 85, 90, 95],
            genders: vec![Gender::Male, Gender::Female],
            tobacco: vec![false, true],
            default_plans: vec!["N".to_string(), "G".to_string(), "F".to_string()],
            plan_overrides,
            plan_exclusions: HashSet::new(),
        }
    }
}

impl RatingAxes {
    /// The plan menu for a jurisdiction, honoring overrides.
    pub fn plans_for(&self, jurisdiction: &Jurisdiction) -> &[String] {
        self.plan_overrides
            .get(jurisdiction)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_plans)
    }

    /// Every rating-parameter combination to quote for a carrier in a
    /// jurisdiction, minus excluded plans.
    pub fn combinations(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
    ) -> Vec<RatingParams> {
        let mut out = Vec::new();
        for plan in self.plans_for(jurisdiction) {
            let excluded = self.plan_exclusions.contains(&(
                carrier,
                jurisdiction.clone(),
                plan.clone(),
            ));
            if excluded {
                continue;
            }
            for &age in &self.ages {
                for &gender in &self.genders {
                    for &tobacco in &self.tobacco {
                        out.push(RatingParams {
                            age,
                            gender,
                            plan: plan.clone(),
                            tobacco,
                        });
                    }
                }
            }
        }
        out
    }

    /// A single cheap parameter combination used for probing: the lowest
    /// age, first gender, first plan, non-tobacco.
    pub fn probe(&self, jurisdiction: &Jurisdiction) -> RatingParams {
        RatingParams {
            age: self.ages.first().copied().unwrap_or(65),
            gender: self.genders.first().copied().unwrap_or(Gender::Male),
            plan: self
                .plans_for(jurisdiction)
                .first()
                .cloned()
                .unwrap_or_else(|| "N".to_string()),
            tobacco: false,
        }
    }
}

/// Retry and sampling knobs for the fetch orchestrator.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Representative locations quoted per rating region.
    pub representatives_per_region: usize,
    /// Consecutive empty results tolerated before a task is abandoned.
    pub empty_retry_budget: u32,
    /// Transient failures tolerated per location before giving up.
    pub transient_retry_budget: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            representatives_per_region: 1,
            empty_retry_budget: 3,
            transient_retry_budget: 3,
        }
    }
}

/// Limits on outbound request pressure against the quoting API.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Requests allowed in flight at once.
    pub max_in_flight: usize,
    /// Requests allowed per window.
    pub max_per_window: u32,
    pub window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            max_per_window: 50,
            window: Duration::from_secs(1),
        }
    }
}

/// Region mapper settings.
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    /// Jurisdictions mapped at administrative-grouping granularity instead
    /// of per location.
    pub coarse_jurisdictions: HashSet<Jurisdiction>,
}

impl MapperConfig {
    pub fn coarse<I, S>(jurisdictions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            coarse_jurisdictions: jurisdictions
                .into_iter()
                .map(|j| Jurisdiction::new(j.as_ref()))
                .collect(),
        }
    }
}
