//! The centroid store: one authoritative copy at the coordinator, one read-only replica at
//! every worker, kept in sync by [`crate::controller`] through broadcast.

use crate::vector;

/// Centroids (`mu`, `C × S`) and populations (`n`, `C`) for every cabinet, stored as a
/// contiguous row-major buffer rather than `Vec<Vec<f64>>` so a broadcast or reduce can move the
/// whole thing in one collective call.
#[derive(Debug, Clone)]
pub struct CentroidStore {
    num_cabinets: usize,
    num_subjects: usize,
    mu: Vec<f64>,
    n: Vec<i64>,
}

impl CentroidStore {
    /// A store with every centroid at the origin and every population at zero, the state the
    /// coordinator starts from before the first merge of iteration 0.
    pub fn zeroed(num_cabinets: usize, num_subjects: usize) -> Self {
        CentroidStore {
            num_cabinets,
            num_subjects,
            mu: vec![0.0; num_cabinets * num_subjects],
            n: vec![0; num_cabinets],
        }
    }

    pub fn num_cabinets(&self) -> usize {
        self.num_cabinets
    }

    pub fn num_subjects(&self) -> usize {
        self.num_subjects
    }

    /// The centroid of cabinet `c`.
    pub fn row(&self, c: usize) -> &[f64] {
        let s = self.num_subjects;
        &self.mu[c * s..(c + 1) * s]
    }

    fn row_mut(&mut self, c: usize) -> &mut [f64] {
        let s = self.num_subjects;
        &mut self.mu[c * s..(c + 1) * s]
    }

    /// The global population of cabinet `c`.
    pub fn population(&self, c: usize) -> i64 {
        self.n[c]
    }

    /// The flat `C × S` centroid buffer, for handing to a broadcast or reduce.
    pub fn mu_buffer(&self) -> &[f64] {
        &self.mu
    }

    pub fn mu_buffer_mut(&mut self) -> &mut [f64] {
        &mut self.mu
    }

    /// The flat `C` population buffer.
    pub fn n_buffer(&self) -> &[i64] {
        &self.n
    }

    pub fn n_buffer_mut(&mut self) -> &mut [i64] {
        &mut self.n
    }

    /// Folds a merged set of per-cabinet deltas into the centroid store. Only ever called by the
    /// coordinator, after `reduce_sum` has summed every worker's accumulators.
    ///
    /// For each cabinet `c`: `n'_c = n_c + delta_count[c]`; if `n'_c == 0` the centroid resets to
    /// zero, otherwise `mu_c[i] = (mu_c[i] * n_c + delta_sum[c][i]) / n'_c`. This is the
    /// closed-form update for a weighted mean absorbing a net change of mass `delta_count` with
    /// sum `delta_sum` — it costs `O(C * S)` rather than re-summing the whole corpus. Built from
    /// the same [`vector::scale`] / [`vector::add_assign`] primitives the shard uses, rather than
    /// a hand-rolled loop.
    pub fn fold(&mut self, delta_sum: &[f64], delta_count: &[i64]) {
        debug_assert_eq!(delta_sum.len(), self.num_cabinets * self.num_subjects);
        debug_assert_eq!(delta_count.len(), self.num_cabinets);

        for c in 0..self.num_cabinets {
            let n_prev = self.n[c];
            let n_next = n_prev + delta_count[c];
            let s = self.num_subjects;
            let delta_row = &delta_sum[c * s..(c + 1) * s];

            if n_next == 0 {
                self.row_mut(c).fill(0.0);
            } else {
                let row = self.row_mut(c);
                vector::scale(row, n_prev as f64);
                vector::add_assign(row, delta_row);
                vector::scale(row, 1.0 / n_next as f64);
            }
            self.n[c] = n_next;
        }
    }
}
