//! Transactional execution of a delete plan.
//!
//! Independent subgraphs run concurrently. Within a subgraph, levels run
//! one after another, each level in a single store transaction:
//!
//! 1. Cancellation is checked; a cancelled request retains everything not
//!    yet committed.
//! 2. Objects whose predecessors are not gone are retained as dependency
//!    failures and leave the batch.
//! 3. The transaction locks every object of the batch with a bounded wait.
//! 4. Ownership, the rule table and live referrers are re-read inside the
//!    transaction before each delete.
//! 5. A failing delete rolls back the batch; earlier batches stay committed.

use super::CancelToken;
use crate::authorization::{Authorizer, Grant};
use crate::domain::{
    DeleteOutcome, DenyReason, Failure, FailureKind, ObjectRef, Principal, RetainReason,
};
use crate::error::{StoreError, StoreResult};
use crate::permissions::PermissionModel;
use crate::resolver::ordering::{Plan, Subgraph};
use crate::storage::{GraphStore, StoreTransaction};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

type Outcomes = Vec<(ObjectRef, DeleteOutcome)>;

/// Runs one plan on behalf of one principal.
pub(crate) struct Executor<'a> {
    pub(crate) store: &'a dyn GraphStore,
    pub(crate) permissions: &'a dyn PermissionModel,
    pub(crate) principal: &'a Principal,
    pub(crate) lock_timeout: Duration,
    pub(crate) max_concurrent_subgraphs: usize,
    pub(crate) cancel: &'a CancelToken,
}

impl Executor<'_> {
    /// Execute every subgraph of the plan and collect the outcomes.
    pub(crate) async fn run(
        &self,
        plan: &Plan,
        grants: &BTreeMap<ObjectRef, Grant>,
    ) -> BTreeMap<ObjectRef, DeleteOutcome> {
        let results: Vec<BTreeMap<ObjectRef, DeleteOutcome>> = stream::iter(
            plan.subgraphs
                .iter()
                .map(|subgraph| self.run_subgraph(subgraph, grants)),
        )
        .buffer_unordered(self.max_concurrent_subgraphs.max(1))
        .collect()
        .await;

        results.into_iter().flatten().collect()
    }

    async fn run_subgraph(
        &self,
        subgraph: &Subgraph,
        grants: &BTreeMap<ObjectRef, Grant>,
    ) -> BTreeMap<ObjectRef, DeleteOutcome> {
        let mut outcomes = BTreeMap::new();

        for (level, batch) in subgraph.batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let remaining: Vec<ObjectRef> =
                    subgraph.batches[level..].iter().flatten().copied().collect();
                info!(level, remaining = remaining.len(), "delete cancelled");
                outcomes.extend(
                    remaining
                        .into_iter()
                        .map(|object| (object, DeleteOutcome::Retained(RetainReason::Cancelled))),
                );
                break;
            }

            let mut ready = Vec::with_capacity(batch.len());
            for object in batch {
                let blocked = subgraph
                    .predecessors
                    .get(object)
                    .into_iter()
                    .flatten()
                    .any(|predecessor| {
                        !outcomes
                            .get(predecessor)
                            .is_some_and(DeleteOutcome::is_gone)
                    });
                if blocked {
                    debug!(%object, "prerequisite not deleted");
                    outcomes.insert(
                        *object,
                        DeleteOutcome::Retained(RetainReason::DependencyFailed),
                    );
                } else {
                    ready.push(*object);
                }
            }

            if !ready.is_empty() {
                outcomes.extend(self.run_batch(level, &ready, grants).await);
            }
        }

        outcomes
    }

    async fn run_batch(
        &self,
        level: usize,
        batch: &[ObjectRef],
        grants: &BTreeMap<ObjectRef, Grant>,
    ) -> Outcomes {
        debug!(level, objects = batch.len(), "executing batch");

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(error) => {
                warn!(level, %error, "could not open transaction");
                return fail_all(batch, &Failure::storage(error.to_string()));
            }
        };

        if let Err(error) = tx.lock(batch, self.lock_timeout).await {
            warn!(level, %error, "batch locks not acquired");
            let failure = match error {
                StoreError::LockTimeout { .. } => {
                    Failure::new(FailureKind::LockTimeout, error.to_string())
                }
                other => Failure::storage(other.to_string()),
            };
            if let Err(error) = tx.rollback().await {
                warn!(level, %error, "rollback failed");
            }
            return fail_all(batch, &failure);
        }

        let mut authorizer = Authorizer::new(self.principal, self.permissions);
        let mut outcomes: Outcomes = Vec::with_capacity(batch.len());
        let mut staged: Vec<ObjectRef> = Vec::new();

        for object in batch {
            let Some(grant) = grants.get(object) else {
                outcomes.push((*object, DeleteOutcome::Denied(DenyReason::PermissionDenied)));
                continue;
            };

            match attempt(tx.as_mut(), &mut authorizer, object, grant).await {
                Ok(Some(outcome)) => outcomes.push((*object, outcome)),
                Ok(None) => staged.push(*object),
                Err(error) => {
                    warn!(%object, %error, "delete failed, rolling back batch");
                    if let Err(error) = tx.rollback().await {
                        warn!(level, %error, "rollback failed");
                    }

                    let failure = Failure::storage(error.to_string());
                    outcomes.push((*object, DeleteOutcome::Failed(failure)));
                    let rolled_back = Failure::rolled_back(*object);
                    for sibling in batch {
                        if !outcomes.iter().any(|(decided, _)| decided == sibling) {
                            outcomes.push((*sibling, DeleteOutcome::Failed(rolled_back.clone())));
                        }
                    }
                    return outcomes;
                }
            }
        }

        match tx.commit().await {
            Ok(()) => {
                debug!(level, deleted = staged.len(), "batch committed");
                outcomes.extend(
                    staged
                        .into_iter()
                        .map(|object| (object, DeleteOutcome::Deleted)),
                );
            }
            Err(error) => {
                warn!(level, %error, "commit failed");
                let failure = Failure::storage(format!("commit failed: {error}"));
                outcomes.extend(fail_all(&staged, &failure));
            }
        }
        outcomes
    }
}

/// Re-check one object inside the transaction and stage its delete.
///
/// Returns the outcome if the object is left in place, `None` once its
/// delete is staged.
async fn attempt(
    tx: &mut dyn StoreTransaction,
    authorizer: &mut Authorizer<'_>,
    object: &ObjectRef,
    grant: &Grant,
) -> StoreResult<Option<DeleteOutcome>> {
    let Some(ownership) = tx.owner_and_group(object).await? else {
        return Ok(Some(DeleteOutcome::Retained(RetainReason::NotFound)));
    };

    let authority = if grant.authority == *object {
        ownership
    } else {
        tx.owner_and_group(&grant.authority)
            .await?
            .unwrap_or(ownership)
    };
    if !authorizer.may_delete(&authority).await? {
        return Ok(Some(DeleteOutcome::Denied(DenyReason::PermissionDenied)));
    }

    let referrers = tx.referrers(object).await?;
    if !referrers.is_empty() {
        let mut owners = Vec::with_capacity(referrers.len());
        for referrer in &referrers {
            owners.push(tx.owner_and_group(referrer).await?.map(|found| found.owner));
        }
        if !grant.force.covers(owners) {
            return Ok(Some(DeleteOutcome::Retained(RetainReason::StillReferenced)));
        }
        debug!(%object, referrers = referrers.len(), "force-deleting shared object");
    }

    tx.delete(object).await?;
    Ok(None)
}

fn fail_all(objects: &[ObjectRef], failure: &Failure) -> Outcomes {
    objects
        .iter()
        .map(|object| (*object, DeleteOutcome::Failed(failure.clone())))
        .collect()
}
