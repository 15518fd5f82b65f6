//! Tenant fan-out and the per-tenant detect → persist → escalate → score
//! sequence.

use std::{
  collections::HashMap,
  sync::Arc,
  time::{Duration, Instant},
};

use chrono::{Duration as Days, NaiveDate};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};
use vigil_core::{
  cache::Clock,
  detect::{self, labor::HistoryEntry},
  exception::Exception,
  org::{Org, Venue},
  policy::{LaborBounds, OrgPolicy, PolicyFamily, PolicyStore, Versioned},
  scoring::ScoreWeights,
  store::{FactSource, PolicySettings, ViolationStore},
  violation::{NewViolation, Severity},
};

use crate::{
  escalation,
  report::{RunReport, TenantReport},
  repository::ViolationRepository,
  scoring,
};

/// Everything a pipeline needs from storage.
pub trait Backend: FactSource + PolicySettings + ViolationStore + 'static {}

impl<T> Backend for T where T: FactSource + PolicySettings + ViolationStore + 'static {}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Upper bound on one tenant's whole run, measured after it gets a slot.
  pub tenant_timeout:         Duration,
  pub max_concurrent_tenants: usize,
  pub labor_bounds:           LaborBounds,
  pub score_weights:          ScoreWeights,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      tenant_timeout:         Duration::from_secs(300),
      max_concurrent_tenants: 8,
      labor_bounds:           LaborBounds::default(),
      score_weights:          ScoreWeights::default(),
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<S> {
  inner: Arc<Inner<S>>,
}

impl<S> Clone for Pipeline<S> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

struct Inner<S> {
  store:    Arc<S>,
  policies: Arc<PolicyStore<S>>,
  clock:    Arc<dyn Clock>,
  config:   PipelineConfig,
}

/// An exception together with the policy version that produced it.
struct Detected {
  exception: Exception,
  snapshot:  serde_json::Value,
  version:   i64,
}

impl Detected {
  fn all<T: Serialize>(
    exceptions: Vec<Exception>,
    family: PolicyFamily,
    policy: &Versioned<T>,
  ) -> Vec<Self> {
    let snapshot = policy.snapshot(family);
    exceptions
      .into_iter()
      .map(|exception| Self {
        exception,
        snapshot: snapshot.clone(),
        version: policy.version,
      })
      .collect()
  }
}

impl<S: Backend> Pipeline<S> {
  pub fn new(
    store: Arc<S>,
    policies: Arc<PolicyStore<S>>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
  ) -> Self {
    Self { inner: Arc::new(Inner { store, policies, clock, config }) }
  }

  pub fn store(&self) -> &Arc<S> { &self.inner.store }

  pub fn policies(&self) -> &Arc<PolicyStore<S>> { &self.inner.policies }

  /// Yesterday in UTC, by the pipeline's clock.
  pub fn default_business_date(&self) -> NaiveDate {
    self.inner.clock.now().date_naive() - Days::days(1)
  }

  /// Run every active tenant for `business_date`. Always returns a report;
  /// failures are inside it.
  pub async fn run(&self, business_date: NaiveDate) -> RunReport {
    let started = Instant::now();
    info!(%business_date, "enforcement run started");

    let orgs = match self.inner.store.list_active_orgs().await {
      Ok(orgs) => orgs,
      Err(e) => {
        error!(error = %e, "could not list tenants");
        return RunReport::new(
          business_date,
          elapsed_ms(started),
          Vec::new(),
          vec![format!("listing tenants: {e}")],
        );
      }
    };

    let slots = Arc::new(Semaphore::new(self.inner.config.max_concurrent_tenants.max(1)));
    let mut tasks = JoinSet::new();
    let mut owners: HashMap<tokio::task::Id, Org> = HashMap::new();

    for org in orgs {
      let inner = self.inner.clone();
      let slots = slots.clone();
      let task_org = org.clone();
      let handle = tasks.spawn(async move {
        // The semaphore is never closed, so acquiring cannot fail.
        let _permit = slots.acquire_owned().await.ok();
        let limit = inner.config.tenant_timeout;
        match tokio::time::timeout(limit, inner.process_tenant(&task_org, business_date)).await {
          Ok(report) => report,
          Err(_) => {
            warn!(org_id = %task_org.org_id, timeout = ?limit, "tenant timed out");
            TenantReport::failed(
              task_org.org_id,
              task_org.name.clone(),
              format!("timed out after {limit:?}"),
            )
          }
        }
      });
      owners.insert(handle.id(), org);
    }

    let mut results = Vec::with_capacity(owners.len());
    let mut run_errors = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
      match joined {
        Ok((_, report)) => results.push(report),
        Err(e) => match owners.get(&e.id()) {
          Some(org) => {
            error!(org_id = %org.org_id, error = %e, "tenant task failed");
            results.push(TenantReport::failed(
              org.org_id,
              org.name.clone(),
              format!("tenant task failed: {e}"),
            ));
          }
          None => run_errors.push(format!("unattributed task failure: {e}")),
        },
      }
    }
    results.sort_by(|a, b| (&a.org_name, a.org_id).cmp(&(&b.org_name, b.org_id)));

    let report = RunReport::new(business_date, elapsed_ms(started), results, run_errors);
    info!(
      %business_date,
      orgs = report.orgs_processed,
      violations = report.total_violations,
      errors = report.total_errors,
      elapsed_ms = report.elapsed_ms,
      "enforcement run finished"
    );
    report
  }
}

fn elapsed_ms(started: Instant) -> u64 {
  u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ─── Per tenant ──────────────────────────────────────────────────────────────

impl<S: Backend> Inner<S> {
  async fn process_tenant(&self, org: &Org, business_date: NaiveDate) -> TenantReport {
    let mut report = TenantReport::new(org.org_id, org.name.clone());

    let policy = match self.policies.load(org.org_id).await {
      Ok(p) => p,
      Err(e) => {
        warn!(org_id = %org.org_id, error = %e, "policy load failed");
        report.errors.push(format!("policy: {e}"));
        return report;
      }
    };
    let venues = match self.store.list_venues(org.org_id).await {
      Ok(v) => v,
      Err(e) => {
        warn!(org_id = %org.org_id, error = %e, "venue listing failed");
        report.errors.push(format!("venues: {e}"));
        return report;
      }
    };

    let repo = ViolationRepository::new(&*self.store);
    for venue in &venues {
      let detected = self
        .detect_venue(venue, &policy, business_date, &mut report.errors)
        .await;
      report.exceptions_detected += detected.len();

      for d in detected {
        let source_id = d.exception.source_id.clone();
        let input = NewViolation::from_exception(
          org.org_id,
          Some(venue),
          business_date,
          d.exception,
          d.snapshot,
          Some(d.version),
        );
        match repo.create(input, self.clock.now()).await {
          Ok(outcome) if outcome.is_created() => report.violations_created += 1,
          Ok(outcome) => debug!(
            %source_id,
            violation_id = %outcome.violation_id(),
            "violation already recorded"
          ),
          Err(e) => {
            warn!(venue_id = %venue.venue_id, %source_id, error = %e, "violation persist failed");
            report.errors.push(format!("persist {source_id}: {e}"));
          }
        }
      }
    }

    match escalation::run(
      &*self.store,
      org.org_id,
      business_date,
      self.clock.now(),
      &policy.escalation,
      &mut report.errors,
    )
    .await
    {
      Ok(counts) => report.escalation = counts,
      Err(e) => {
        warn!(org_id = %org.org_id, error = %e, "escalation failed");
        report.errors.push(format!("escalation: {e}"));
      }
    }

    match scoring::run(
      &*self.store,
      org.org_id,
      &venues,
      business_date,
      &self.config.score_weights,
      &mut report.errors,
    )
    .await
    {
      Ok(counts) => report.scores = counts,
      Err(e) => {
        warn!(org_id = %org.org_id, error = %e, "scoring failed");
        report.errors.push(format!("scoring: {e}"));
      }
    }

    info!(
      org_id = %org.org_id,
      %business_date,
      venues = venues.len(),
      exceptions = report.exceptions_detected,
      created = report.violations_created,
      escalations = report.escalation.total(),
      errors = report.errors.len(),
      "tenant processed"
    );
    report
  }

  /// Run every applicable detector for one venue. A failing fetch skips
  /// only the detector that needed it.
  async fn detect_venue(
    &self,
    venue: &Venue,
    policy: &OrgPolicy,
    date: NaiveDate,
    errors: &mut Vec<String>,
  ) -> Vec<Detected> {
    let mut out = Vec::new();
    let v = venue.venue_id;
    let mut fail = |what: &str, e: &dyn std::fmt::Display| {
      warn!(venue_id = %v, detector = what, error = %e, "detector skipped");
      errors.push(format!("venue {} ({v}): {what}: {e}", venue.name));
    };

    let labor_day = match self.store.labor_day(v, date).await {
      Ok(day) => day,
      Err(e) => {
        fail("labor facts", &e);
        None
      }
    };

    // ── Comps ──
    if let Some(comp) = &policy.comp
      && venue.pos_location_id.is_some()
    {
      match self.store.comp_checks(v, date).await {
        Ok(checks) => {
          let net_sales = labor_day.as_ref().map(|d| d.net_sales);
          let found = detect::comp::detect(v, date, &checks, net_sales, &comp.policy);
          out.extend(Detected::all(found, PolicyFamily::Comp, comp));
        }
        Err(e) => fail("comp", &e),
      }
    }

    // ── Labor ──
    if let Some(standards) = &policy.labor
      && let Some(day) = &labor_day
    {
      let bounds = &self.config.labor_bounds;
      let from = date - Days::days(bounds.structural.long_window_days.max(1));
      match self.store.list_venue_violations(v, from, date - Days::days(1)).await {
        Ok(past) => {
          let history: Vec<HistoryEntry> = past
            .iter()
            .filter(|p| p.violation_type.is_labor())
            .map(|p| HistoryEntry {
              business_date: p.business_date,
              critical:      p.severity == Severity::Critical,
            })
            .collect();
          let found = detect::labor::detect(day, &standards.policy, bounds, &history);
          let mut detected = Detected::all(found, PolicyFamily::Labor, standards);
          let bounds_json = serde_json::to_value(bounds).unwrap_or_default();
          for d in &mut detected {
            if let Some(map) = d.snapshot.as_object_mut() {
              map.insert("bounds".into(), bounds_json.clone());
            }
          }
          out.extend(detected);
        }
        Err(e) => fail("labor history", &e),
      }
    }

    // ── Procurement ──
    if let Some(proc) = &policy.procurement {
      let p = &proc.policy;
      let store = &*self.store;

      match store
        .cost_entries(v, detect::procurement::cost_history_start(date, p), date)
        .await
      {
        Ok(entries) => out.extend(Detected::all(
          detect::procurement::cost_spikes(v, date, &entries, p),
          PolicyFamily::Procurement,
          proc,
        )),
        Err(e) => fail("cost spikes", &e),
      }

      match store.unresolved_invoice_variances(v).await {
        Ok(rows) => out.extend(Detected::all(
          detect::procurement::invoice_variances(&rows),
          PolicyFamily::Procurement,
          proc,
        )),
        Err(e) => fail("invoice variances", &e),
      }

      let counts = store
        .inventory_counts(v, detect::procurement::shrink_window_start(date, p), date)
        .await;
      match counts {
        Ok(counts) if counts.is_empty() => {}
        Ok(counts) => match store.inventory_balances(v).await {
          Ok(balances) => out.extend(Detected::all(
            detect::procurement::inventory_shrink(date, &counts, &balances, p),
            PolicyFamily::Procurement,
            proc,
          )),
          Err(e) => fail("inventory shrink", &e),
        },
        Err(e) => fail("inventory shrink", &e),
      }

      match store.recipe_cost_snapshots(v, date).await {
        Ok(snaps) => out.extend(Detected::all(
          detect::procurement::recipe_drift(v, date, &snaps, p),
          PolicyFamily::Procurement,
          proc,
        )),
        Err(e) => fail("recipe drift", &e),
      }

      match store.items_below_reorder_point(v).await {
        Ok(rows) => out.extend(Detected::all(
          detect::procurement::par_levels(v, date, &rows),
          PolicyFamily::Procurement,
          proc,
        )),
        Err(e) => fail("par levels", &e),
      }
    }

    out
  }
}
