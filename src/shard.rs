//! Per-worker state: the slice of documents a worker owns, their current cabinet assignments,
//! and the accumulators that record what's changed since the last merge.

use crate::vector;

/// One worker's slice of the corpus, plus the deltas it owes the coordinator at the next merge.
///
/// Subject vectors are immutable for the run and owned here in one flat `local_docs * num_subjects`
/// buffer; assignments are mutable and owned here too. `delta_sum` / `delta_count` are the
/// worker-private accumulators of §4.3: zero after every merge, populated by [`LocalShard::assign`]
/// as reassignments happen.
pub struct LocalShard {
    first_global_id: usize,
    num_subjects: usize,
    num_cabinets: usize,
    subjects: Vec<f64>,
    assignment: Vec<usize>,
    delta_sum: Vec<f64>,
    delta_count: Vec<i64>,
    dist: Vec<f64>,
}

impl LocalShard {
    /// Builds a shard from this worker's subject vectors (row-major, `local_docs * num_subjects`)
    /// and seed assignment, starting with zeroed accumulators.
    pub fn new(
        first_global_id: usize,
        num_subjects: usize,
        num_cabinets: usize,
        subjects: Vec<f64>,
        assignment: Vec<usize>,
    ) -> Self {
        let local_docs = assignment.len();
        debug_assert_eq!(subjects.len(), local_docs * num_subjects);
        LocalShard {
            first_global_id,
            num_subjects,
            num_cabinets,
            subjects,
            assignment,
            delta_sum: vec![0.0; num_cabinets * num_subjects],
            delta_count: vec![0; num_cabinets],
            dist: vec![0.0; local_docs * num_cabinets],
        }
    }

    pub fn local_docs(&self) -> usize {
        self.assignment.len()
    }

    pub fn global_id(&self, local_idx: usize) -> usize {
        self.first_global_id + local_idx
    }

    /// The immutable subject vector of the document at `local_idx`.
    pub fn subjects(&self, local_idx: usize) -> &[f64] {
        let s = self.num_subjects;
        &self.subjects[local_idx * s..(local_idx + 1) * s]
    }

    pub fn assignment(&self, local_idx: usize) -> usize {
        self.assignment[local_idx]
    }

    /// Folds the initial seed assignment into the accumulators, as if every document had just
    /// been "moved" from nowhere into its seed cabinet. Used once, during ingest, before
    /// iteration 0's merge (§4.6).
    pub fn seed_accumulators(&mut self) {
        for local_idx in 0..self.local_docs() {
            let c = self.assignment[local_idx];
            let s = self.num_subjects;
            let subj = &self.subjects[local_idx * s..(local_idx + 1) * s];
            vector::add_assign(&mut self.delta_sum[c * s..(c + 1) * s], subj);
            self.delta_count[c] += 1;
        }
    }

    /// Moves document `local_idx` to `new_cabinet`, folding the move into the accumulators.
    /// A no-op if `new_cabinet` is already the document's current cabinet.
    pub fn assign(&mut self, local_idx: usize, new_cabinet: usize) {
        let old_cabinet = self.assignment[local_idx];
        if old_cabinet == new_cabinet {
            return;
        }
        let s = self.num_subjects;
        let subj_start = local_idx * s;
        let subj = &self.subjects[subj_start..subj_start + s].to_vec();

        vector::sub_assign(&mut self.delta_sum[old_cabinet * s..(old_cabinet + 1) * s], subj);
        vector::add_assign(&mut self.delta_sum[new_cabinet * s..(new_cabinet + 1) * s], subj);
        self.delta_count[old_cabinet] -= 1;
        self.delta_count[new_cabinet] += 1;
        self.assignment[local_idx] = new_cabinet;
    }

    /// The worker's accumulated delta-sum buffer (`C × S`), ready to be reduced to the
    /// coordinator.
    pub fn delta_sum(&self) -> &[f64] {
        &self.delta_sum
    }

    pub fn delta_count(&self) -> &[i64] {
        &self.delta_count
    }

    /// Zeroes both accumulators. Called by every shard right after its contribution has been
    /// folded into the merge.
    pub fn clear_accumulators(&mut self) {
        self.delta_sum.iter_mut().for_each(|x| *x = 0.0);
        self.delta_count.iter_mut().for_each(|x| *x = 0);
    }

    /// `Σ_d distance2(s_d, mu_{a_d})` over this worker's owned documents, reusing the distance
    /// matrix left behind by the most recent [`LocalShard::refresh_distances`]. Cheap (no new
    /// distance computation) as long as it's called after reassignment has settled each
    /// document onto its nearest cabinet, which is when the cached row equals that minimum.
    pub fn local_objective(&self) -> f64 {
        let c_count = self.num_cabinets;
        (0..self.local_docs())
            .map(|local_idx| self.dist[local_idx * c_count + self.assignment[local_idx]])
            .sum()
    }

    /// Recomputes `dist[d, c] = distance2(s_d, mu_c)` for every owned document and every cabinet,
    /// against the worker's (just-broadcast) centroid replica.
    ///
    /// The per-document inner loop is independent across documents and may be split across
    /// threads by a caller that partitions `0..local_docs()` into disjoint ranges and calls
    /// [`LocalShard::refresh_distances_range`] on each; this sequential version is the single-
    /// range case.
    pub fn refresh_distances(&mut self, mu: &[f64]) {
        let local_docs = self.local_docs();
        self.refresh_distances_range(mu, 0..local_docs);
    }

    /// Same as [`LocalShard::refresh_distances`], restricted to local indices in `range`. Two
    /// disjoint ranges never touch the same slice of `dist` or `subjects`, so this is safe to
    /// call concurrently from multiple threads against `&mut` splits of the same shard (see
    /// [`LocalShard::reassign_parallel`]).
    pub fn refresh_distances_range(&mut self, mu: &[f64], range: std::ops::Range<usize>) {
        let s = self.num_subjects;
        let c_count = self.num_cabinets;
        for local_idx in range {
            let subj = &self.subjects[local_idx * s..(local_idx + 1) * s];
            let dist_row = &mut self.dist[local_idx * c_count..(local_idx + 1) * c_count];
            for c in 0..c_count {
                dist_row[c] = vector::distance2(subj, &mu[c * s..(c + 1) * s]);
            }
        }
    }

    /// For each owned document, finds `c* = argmin_c dist[d, c]`, ties broken toward the
    /// document's current cabinet first and then the lowest index, reassigns if `c* != a_d`, and
    /// returns whether any reassignment happened on this worker.
    pub fn reassign(&mut self) -> bool {
        let mut moved = false;
        for local_idx in 0..self.local_docs() {
            if self.reassign_one(local_idx) {
                moved = true;
            }
        }
        moved
    }

    fn best_cabinet(&self, local_idx: usize) -> usize {
        let c_count = self.num_cabinets;
        let current = self.assignment[local_idx];
        let dist_row = &self.dist[local_idx * c_count..(local_idx + 1) * c_count];

        let mut best = 0;
        let mut best_dist = dist_row[0];
        for c in 1..c_count {
            let d = dist_row[c];
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        // Tie-break: if the current assignment ties the minimum, keep it.
        if dist_row[current] == best_dist {
            current
        } else {
            best
        }
    }

    fn reassign_one(&mut self, local_idx: usize) -> bool {
        let c_star = self.best_cabinet(local_idx);
        if c_star != self.assignment[local_idx] {
            self.assign(local_idx, c_star);
            true
        } else {
            false
        }
    }

    /// Thread-parallel distance refresh + reassignment over `num_threads` disjoint, contiguous
    /// local-index ranges. Each thread is handed an exclusive `&mut` sub-slice of `dist` and of
    /// `assignment` via `split_at_mut`, so the per-document distance writes and reassignment
    /// decisions in the hot loop take no lock at all; only the per-thread shadow
    /// `(delta_sum, delta_count)` accumulator is merged into the shard's real accumulators at
    /// join (§4.3, §5). Produces identical results to calling [`LocalShard::refresh_distances`]
    /// then [`LocalShard::reassign`] sequentially, because reassignment decisions for one
    /// document never depend on another document's decision within the same iteration.
    pub fn reassign_parallel(&mut self, mu: &[f64], num_threads: usize) -> bool {
        let local_docs = self.local_docs();
        if num_threads <= 1 || local_docs == 0 {
            self.refresh_distances(mu);
            return self.reassign();
        }

        let num_threads = num_threads.min(local_docs.max(1));
        let chunk = local_docs.div_ceil(num_threads);
        let ranges: Vec<std::ops::Range<usize>> = (0..num_threads)
            .map(|t| (t * chunk).min(local_docs)..((t + 1) * chunk).min(local_docs))
            .filter(|r| !r.is_empty())
            .collect();

        let s = self.num_subjects;
        let c_count = self.num_cabinets;
        let subjects = &self.subjects;

        let mut dist_rest = self.dist.as_mut_slice();
        let mut assignment_rest = self.assignment.as_mut_slice();
        let mut dist_chunks = Vec::with_capacity(ranges.len());
        let mut assignment_chunks = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let len = range.len();
            let (head, tail) = dist_rest.split_at_mut(len * c_count);
            dist_chunks.push(head);
            dist_rest = tail;
            let (head_a, tail_a) = assignment_rest.split_at_mut(len);
            assignment_chunks.push(head_a);
            assignment_rest = tail_a;
        }

        let shadow_results: Vec<(Vec<f64>, Vec<i64>, bool)> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .cloned()
                .zip(dist_chunks)
                .zip(assignment_chunks)
                .map(|((range, dist_slice), assignment_slice)| {
                    scope.spawn(move || {
                        let mut shadow_sum = vec![0.0; c_count * s];
                        let mut shadow_count = vec![0i64; c_count];
                        let mut moved = false;

                        for (offset, local_idx) in range.clone().enumerate() {
                            let subj = &subjects[local_idx * s..(local_idx + 1) * s];
                            let dist_row = &mut dist_slice[offset * c_count..(offset + 1) * c_count];
                            for c in 0..c_count {
                                dist_row[c] = vector::distance2(subj, &mu[c * s..(c + 1) * s]);
                            }
                        }

                        for (offset, local_idx) in range.enumerate() {
                            let current = assignment_slice[offset];
                            let dist_row = &dist_slice[offset * c_count..(offset + 1) * c_count];
                            let mut best = 0;
                            let mut best_dist = dist_row[0];
                            for c in 1..c_count {
                                if dist_row[c] < best_dist {
                                    best_dist = dist_row[c];
                                    best = c;
                                }
                            }
                            let c_star = if dist_row[current] == best_dist { current } else { best };
                            if c_star != current {
                                let subj = &subjects[local_idx * s..(local_idx + 1) * s];
                                vector::sub_assign(&mut shadow_sum[current * s..(current + 1) * s], subj);
                                vector::add_assign(&mut shadow_sum[c_star * s..(c_star + 1) * s], subj);
                                shadow_count[current] -= 1;
                                shadow_count[c_star] += 1;
                                assignment_slice[offset] = c_star;
                                moved = true;
                            }
                        }
                        (shadow_sum, shadow_count, moved)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut moved_any = false;
        for (shadow_sum, shadow_count, moved) in shadow_results {
            vector::add_assign(&mut self.delta_sum, &shadow_sum);
            for c in 0..c_count {
                self.delta_count[c] += shadow_count[c];
            }
            moved_any |= moved;
        }
        moved_any
    }
}
