//! Idempotent violation creation with best-effort action fan-out.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_core::{
  store::{NewAction, ViolationStore},
  violation::{NewViolation, TemplateVars, Violation, interpolate},
};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
  Created(Violation),
  /// A violation with the same `(org_id, source_id)` was already stored.
  Existing(Uuid),
}

impl CreateOutcome {
  pub fn is_created(&self) -> bool { matches!(self, Self::Created(_)) }

  pub fn violation_id(&self) -> Uuid {
    match self {
      Self::Created(v) => v.violation_id,
      Self::Existing(id) => *id,
    }
  }
}

pub struct ViolationRepository<'a, S> {
  store: &'a S,
}

impl<'a, S: ViolationStore> ViolationRepository<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store } }

  /// Persist `input` unless its `source_id` is already known for the org.
  ///
  /// The lookup only saves a round trip; the store's uniqueness constraint
  /// decides races. The store writes the `created` event together with the
  /// row. Action creation runs after both are durable, and its failures are
  /// logged, not returned. Everything written is stamped with `at`.
  pub async fn create(&self, input: NewViolation, at: DateTime<Utc>) -> Result<CreateOutcome> {
    if let Some(id) = self
      .store
      .find_violation(input.org_id, input.source_id.clone())
      .await
      .map_err(Error::store)?
    {
      return Ok(CreateOutcome::Existing(id));
    }

    let org_id = input.org_id;
    let source_id = input.source_id.clone();
    let Some(violation) = self
      .store
      .insert_violation(input, at)
      .await
      .map_err(Error::store)?
    else {
      // Lost a race with a concurrent run.
      return self
        .store
        .find_violation(org_id, source_id.clone())
        .await
        .map_err(Error::store)?
        .map(CreateOutcome::Existing)
        .ok_or(Error::LostConflict { source_id });
    };

    let actions = self.create_actions(&violation, at).await;
    debug!(
      violation_id = %violation.violation_id,
      source_id = %violation.source_id,
      actions,
      "violation created"
    );
    Ok(CreateOutcome::Created(violation))
  }

  /// One pending action per enabled template matching the violation's type
  /// and severity. Returns how many were written.
  async fn create_actions(&self, v: &Violation, at: DateTime<Utc>) -> usize {
    let templates = match self
      .store
      .matching_templates(v.org_id, v.violation_type, v.severity)
      .await
    {
      Ok(t) => t,
      Err(e) => {
        warn!(violation_id = %v.violation_id, error = %e, "template lookup failed");
        return 0;
      }
    };

    let vars = TemplateVars::of(v);
    let mut written = 0;
    for t in templates {
      let action = NewAction {
        org_id:       v.org_id,
        violation_id: v.violation_id,
        template_id:  t.template_id,
        action_type:  t.action_type,
        message:      interpolate(&t.message_template, vars),
        target:       interpolate(&t.target_template, vars),
      };
      match self.store.insert_action(action, at).await {
        Ok(_) => written += 1,
        Err(e) => warn!(
          violation_id = %v.violation_id,
          template_id = %t.template_id,
          error = %e,
          "action creation failed"
        ),
      }
    }
    written
  }
}
