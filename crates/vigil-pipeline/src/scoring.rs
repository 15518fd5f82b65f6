//! Recomputes and writes risk scores for one tenant.

use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;
use vigil_core::{
  org::Venue,
  scoring::{ScoreWeights, ScoredEntity, score_tenant},
  store::ViolationStore,
};

use crate::{Error, Result, report::ScoreCounts};

/// Score the tenant from its current unresolved violations. A failed write
/// is recorded against that entity in `errors` and does not stop the
/// others.
pub async fn run<S: ViolationStore>(
  store: &S,
  org_id: Uuid,
  venues: &[Venue],
  as_of: NaiveDate,
  weights: &ScoreWeights,
  errors: &mut Vec<String>,
) -> Result<ScoreCounts> {
  let violations = store.list_unresolved(org_id).await.map_err(Error::store)?;
  let mut counts = ScoreCounts::default();

  for record in score_tenant(org_id, &violations, venues, as_of, weights) {
    let (entity, entity_id) = (record.entity, record.entity_id);
    match store.upsert_score(record).await {
      Ok(()) => match entity {
        ScoredEntity::Manager => counts.managers += 1,
        ScoredEntity::Venue => counts.venues += 1,
      },
      Err(e) => {
        warn!(%org_id, entity = entity.as_ref(), %entity_id, error = %e, "score write failed");
        errors.push(format!("scoring: {} {entity_id}: {e}", entity.as_ref()));
      }
    }
  }

  Ok(counts)
}
