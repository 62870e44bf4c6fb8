//! The fixed-point iteration loop: merge deltas, recompute centroids, broadcast, refresh
//! distances, reassign, probe for global convergence. One call to [`run_iteration`] is one
//! iteration of §4.6; [`converge`] repeats it until every worker reports zero moves.

use tracing::info;

use crate::collective::Collective;
use crate::error::Result;
use crate::run::Run;

const COORDINATOR: usize = 0;

/// Runs one iteration of the merge → recompute → broadcast → refresh → reassign → probe cycle,
/// and returns whether *this worker* observed at least one reassignment. Callers that need the
/// global answer should feed this into `allreduce_sum_i64` themselves, or just call
/// [`converge`], which already does.
pub fn run_iteration<C: Collective>(run: &mut Run<C>) -> Result<bool> {
    // 1. Merge: reduce every shard's deltas into the coordinator's aggregate.
    let num_cabinets = run.config.num_cabinets;
    let num_subjects = run.config.num_subjects;

    let mut merged_sum = if run.is_coordinator() { vec![0.0; num_cabinets * num_subjects] } else { Vec::new() };
    let mut merged_count = if run.is_coordinator() { vec![0i64; num_cabinets] } else { Vec::new() };

    run.collective.reduce_sum_f64(run.shard.delta_sum(), &mut merged_sum, COORDINATOR)?;
    run.collective.reduce_sum_i64(run.shard.delta_count(), &mut merged_count, COORDINATOR)?;
    run.shard.clear_accumulators();

    // 2. Recompute centroids (coordinator only).
    if run.is_coordinator() {
        run.centroids.fold(&merged_sum, &merged_count);
    }

    // 3. Broadcast the refreshed centroids to every worker.
    let mut mu = run.centroids.mu_buffer().to_vec();
    run.collective.broadcast_f64(&mut mu, COORDINATOR)?;
    run.centroids.mu_buffer_mut().copy_from_slice(&mu);

    // 4. Distance refresh.
    run.shard.refresh_distances(run.centroids.mu_buffer());

    // 5. Reassign.
    let moved_locally = run.shard.reassign();

    Ok(moved_locally)
}

/// Runs iterations until no worker reassigns any document, logging one structured line per
/// iteration at the coordinator. Returns the number of iterations executed (always at least 1,
/// since iteration 0 is never skipped even when the seed assignment happens to already be
/// stationary).
pub fn converge<C: Collective>(run: &mut Run<C>) -> Result<u64> {
    let mut iteration = 0u64;
    loop {
        let moved_locally = run_iteration(run)?;
        let global_moved = run.collective.allreduce_sum_i64(moved_locally as i64)?;
        let global_objective = run.collective.allreduce_sum_f64(run.shard.local_objective())?;
        iteration += 1;

        if run.is_coordinator() {
            info!(
                iteration,
                global_moved,
                objective = global_objective,
                "completed k-means iteration"
            );
        }

        if global_moved == 0 {
            return Ok(iteration);
        }
    }
}
