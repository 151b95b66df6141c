//! Reconciliation stages and the fan-out helper every stage runs through.

use std::future::Future;
use std::time::Duration;

use trellis_reconcile::{CountingJoin, ReconcileError, ReconcileResult};

/// Where a reconciliation pass currently is.
///
/// A deploy moves `Idle -> DeployingAuditors -> DeployingComponents ->
/// Persisting -> Done`. Updates and teardowns use the remaining stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    DeployingAuditors,
    DeployingComponents,
    Persisting,
    UndeployingComponents,
    UndeployingAuditors,
    RewritingDescriptors,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::DeployingAuditors => "deploying-auditors",
            Stage::DeployingComponents => "deploying-components",
            Stage::Persisting => "persisting",
            Stage::UndeployingComponents => "undeploying-components",
            Stage::UndeployingAuditors => "undeploying-auditors",
            Stage::RewritingDescriptors => "rewriting-descriptors",
            Stage::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Run one task per item concurrently and wait for all of them.
///
/// Completions are joined on a [`CountingJoin`] armed with `deadline`; the
/// first failure wins and siblings already in flight are not cancelled. A
/// stage that times out reports `ReconcileError::Timeout` and ignores late
/// completions.
pub(crate) async fn fan_out<T, F, Fut>(
    stage: Stage,
    deadline: Duration,
    items: impl IntoIterator<Item = T>,
    mut run: F,
) -> ReconcileResult<()>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ReconcileResult<()>> + Send + 'static,
{
    let futures: Vec<Fut> = items.into_iter().map(&mut run).collect();
    let (join, completion) = CountingJoin::<ReconcileError>::channel(futures.len());
    join.arm_deadline(deadline, move |elapsed| ReconcileError::Timeout {
        stage: stage.to_string(),
        elapsed,
    });

    for future in futures {
        let join = join.clone();
        tokio::spawn(async move {
            join.report(future.await);
        });
    }
    drop(join);

    completion.await
}
