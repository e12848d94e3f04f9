//! The delete engine.
//!
//! [`DeleteEngine`] ties the pipeline together:
//!
//! 1. Reject malformed calls atomically (empty batch, non-positive ids,
//!    unknown acting principal)
//! 2. Resolve the closure of the requested roots
//! 3. Fail components with link cycles
//! 4. Authorize and settle shared-object retention
//! 5. Plan independent subgraphs and their levels
//! 6. Execute, one transaction per level and subgraph
//! 7. Aggregate the outcomes into a [`DeleteReport`]
//!
//! Calls of the same acting principal are serialized; calls of different
//! principals run concurrently.
//!
//! # Example
//!
//! ```no_run
//! use cascade::config::EngineConfig;
//! use cascade::domain::{
//!     DeleteRequest, GroupId, ObjectRef, Ownership, PermissionLevel, Principal, PrincipalId, Role,
//! };
//! use cascade::engine::DeleteEngine;
//! use cascade::permissions::StaticPermissions;
//! use cascade::storage::in_memory::InMemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let permissions = Arc::new(StaticPermissions::new());
//!     permissions.set_group_level(GroupId(1), PermissionLevel::ReadWriteCollab).await;
//!     permissions.add_principal(PrincipalId(7)).await;
//!     store
//!         .insert(ObjectRef::image(1), Ownership::new(PrincipalId(7), GroupId(1)))
//!         .await?;
//!
//!     let engine = DeleteEngine::new(store, permissions, EngineConfig::default())?;
//!     let principal = Principal::new(PrincipalId(7)).with_membership(GroupId(1), Role::Member);
//!     let report = engine
//!         .delete_batch(&principal, &[DeleteRequest::new(ObjectRef::image(1))])
//!         .await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

mod cancel;
mod executor;

pub use cancel::CancelToken;

use crate::authorization::{self, Authorization};
use crate::config::EngineConfig;
use crate::domain::{DeleteOutcome, DeleteRequest, Failure, FailureKind, Principal, PrincipalId};
use crate::error::{Error, Result};
use crate::permissions::PermissionModel;
use crate::report::{DeleteReport, ReportBuilder};
use crate::resolver::ordering::{self, Plan, Subgraph};
use crate::resolver::{self, Closure};
use crate::storage::GraphStore;
use executor::Executor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Permission-aware cascading delete engine.
pub struct DeleteEngine {
    store: Arc<dyn GraphStore>,
    permissions: Arc<dyn PermissionModel>,
    config: EngineConfig,
    gates: Mutex<HashMap<PrincipalId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Everything decided before execution.
struct Evaluation {
    report: ReportBuilder,
    closure: Closure,
    authorization: Authorization,
    plan: Plan,
}

impl DeleteEngine {
    /// Create an engine over a store and a permission model.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(
        store: Arc<dyn GraphStore>,
        permissions: Arc<dyn PermissionModel>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            permissions,
            config,
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Delete a batch of objects on behalf of `principal`.
    ///
    /// Partial failures never raise; every touched object is reported.
    ///
    /// # Errors
    ///
    /// - `Error::EmptyRequest` if `requests` is empty
    /// - `Error::InvalidRequest` if a request names a non-positive id
    /// - `Error::UnknownPrincipal` if the permission model does not know
    ///   the acting principal
    /// - `Error::Store` if the principal could not be looked up
    pub async fn delete_batch(
        &self,
        principal: &Principal,
        requests: &[DeleteRequest],
    ) -> Result<DeleteReport> {
        self.delete_batch_with_cancel(principal, requests, &CancelToken::new())
            .await
    }

    /// Delete a batch that can be cancelled between transactions.
    ///
    /// Cancelled objects are reported as retained; committed batches stay
    /// committed.
    ///
    /// # Errors
    ///
    /// Same as [`delete_batch`](Self::delete_batch).
    pub async fn delete_batch_with_cancel(
        &self,
        principal: &Principal,
        requests: &[DeleteRequest],
        cancel: &CancelToken,
    ) -> Result<DeleteReport> {
        self.validate(principal, requests).await?;

        let gate = self.gate(principal.id);
        let report = {
            let _turn = gate.lock().await;
            self.execute(principal, requests, cancel).await
        };
        self.release_gate(principal.id, gate);
        Ok(report)
    }

    /// Evaluate and execute one validated batch.
    async fn execute(
        &self,
        principal: &Principal,
        requests: &[DeleteRequest],
        cancel: &CancelToken,
    ) -> DeleteReport {
        let mut evaluation = self.evaluate(principal, requests).await;

        let executor = Executor {
            store: self.store.as_ref(),
            permissions: self.permissions.as_ref(),
            principal,
            lock_timeout: self.config.lock_timeout(),
            max_concurrent_subgraphs: self.config.max_concurrent_subgraphs,
            cancel,
        };
        let outcomes = executor
            .run(&evaluation.plan, &evaluation.authorization.eligible)
            .await;
        evaluation.report.extend(outcomes);

        let report = evaluation.report.finish();
        let summary = report.summary();
        tracing::info!(
            principal = %principal.id,
            requested = evaluation.closure.roots.len(),
            deleted = summary.deleted,
            retained = summary.retained,
            denied = summary.denied,
            failed = summary.failed,
            "delete batch finished"
        );
        report
    }

    /// Predict the outcome of a batch without opening a transaction.
    ///
    /// Objects that would be attempted are reported as deleted. Lock
    /// contention and storage failures cannot be predicted.
    ///
    /// # Errors
    ///
    /// Same as [`delete_batch`](Self::delete_batch).
    pub async fn preview(
        &self,
        principal: &Principal,
        requests: &[DeleteRequest],
    ) -> Result<DeleteReport> {
        self.validate(principal, requests).await?;

        let mut evaluation = self.evaluate(principal, requests).await;
        let planned: Vec<_> = evaluation
            .plan
            .subgraphs
            .iter()
            .flat_map(Subgraph::objects)
            .map(|object| (object, DeleteOutcome::Deleted))
            .collect();

        tracing::debug!(
            principal = %principal.id,
            planned = planned.len(),
            "delete batch previewed"
        );
        evaluation.report.extend(planned);
        Ok(evaluation.report.finish())
    }

    async fn validate(&self, principal: &Principal, requests: &[DeleteRequest]) -> Result<()> {
        if requests.is_empty() {
            return Err(Error::EmptyRequest);
        }
        if let Some(request) = requests.iter().find(|request| request.target.id <= 0) {
            return Err(Error::InvalidRequest(format!(
                "{} does not name a stored object",
                request.target
            )));
        }
        if !self.permissions.is_known_principal(principal.id).await? {
            return Err(Error::UnknownPrincipal(principal.id));
        }
        Ok(())
    }

    fn gate(&self, principal: PrincipalId) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(principal).or_default())
    }

    /// Forget the gate of `principal` once no call holds or awaits it.
    fn release_gate(&self, principal: PrincipalId, gate: Arc<tokio::sync::Mutex<()>>) {
        drop(gate);
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates
            .get(&principal)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&principal);
        }
    }

    #[cfg(test)]
    fn open_gates(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve, authorize and plan, recording every settled outcome.
    async fn evaluate(&self, principal: &Principal, requests: &[DeleteRequest]) -> Evaluation {
        let mut report = ReportBuilder::new(Vec::new());
        let mut closure = resolver::resolve(self.store.as_ref(), requests).await;
        report.set_roots(closure.roots.clone());
        report.extend(std::mem::take(&mut closure.outcomes));

        let cyclic = ordering::cyclic_objects(&closure);
        if !cyclic.is_empty() {
            tracing::warn!(objects = cyclic.len(), "containment cycle detected");
            let failure = Failure::new(FailureKind::InvalidGraph, "containment cycle detected");
            report.extend(
                cyclic
                    .iter()
                    .map(|object| (*object, DeleteOutcome::Failed(failure.clone()))),
            );
            closure.remove(&cyclic);
        }

        let authorization =
            authorization::authorize(&closure, principal, self.permissions.as_ref()).await;
        report.extend(authorization.outcomes.clone());

        let plan = ordering::plan(&closure, &authorization.eligible_set());
        if !plan.invalid.is_empty() {
            let failure = Failure::new(FailureKind::InvalidGraph, "delete order has a cycle");
            report.extend(
                plan.invalid
                    .iter()
                    .map(|object| (*object, DeleteOutcome::Failed(failure.clone()))),
            );
        }

        tracing::debug!(
            objects = closure.len(),
            eligible = authorization.eligible.len(),
            subgraphs = plan.subgraphs.len(),
            "delete planned"
        );
        Evaluation {
            report,
            closure,
            authorization,
            plan,
        }
    }
}
