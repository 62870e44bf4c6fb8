//! Deterministic mapping from global document id to owning worker, and the initial cabinet
//! seeding every document starts in.

/// Number of documents owned by worker `w` out of `num_docs` total documents split across
/// `num_workers` workers.
///
/// Worker `w` owns `floor(num_docs / num_workers) + extra(w)` documents, where `extra(w) == 1`
/// iff `w >= num_workers - (num_docs % num_workers)`. The remainder therefore lands on the
/// highest-indexed workers, and every worker ends up with either `floor(D/W)` or `ceil(D/W)`
/// documents.
pub fn docs_for_worker(worker: usize, num_workers: usize, num_docs: usize) -> usize {
    let base = num_docs / num_workers;
    let remainder = num_docs % num_workers;
    let extra = if worker >= num_workers - remainder { 1 } else { 0 };
    base + extra
}

/// The first global document id owned by worker `w`.
///
/// Workers are handed consecutive blocks in worker-index order: worker 0's block starts at
/// document 0, worker 1's block starts wherever worker 0's ends, and so on.
pub fn first_doc_for_worker(worker: usize, num_workers: usize, num_docs: usize) -> usize {
    (0..worker).map(|w| docs_for_worker(w, num_workers, num_docs)).sum()
}

/// Which worker owns global document id `doc_id`.
pub fn owner_of(doc_id: usize, num_workers: usize, num_docs: usize) -> usize {
    let mut start = 0;
    for w in 0..num_workers {
        let count = docs_for_worker(w, num_workers, num_docs);
        if doc_id < start + count {
            return w;
        }
        start += count;
    }
    unreachable!("doc_id {doc_id} out of range for {num_docs} documents")
}

/// The required initial cabinet assignment: `a_d := d mod C`.
///
/// This guarantees every cabinet with index `< D` receives at least one document, and the
/// population distribution differs by at most one across cabinets at `t = 0`.
#[inline]
pub fn seed_cabinet(doc_id: usize, num_cabinets: usize) -> usize {
    doc_id % num_cabinets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_gives_every_worker_the_same_share() {
        for w in 0..4 {
            assert_eq!(docs_for_worker(w, 4, 100), 25);
        }
    }

    #[test]
    fn remainder_lands_on_highest_indexed_workers() {
        // 10 docs over 4 workers: base 2, remainder 2 -> workers 2 and 3 get an extra doc.
        assert_eq!(docs_for_worker(0, 4, 10), 2);
        assert_eq!(docs_for_worker(1, 4, 10), 2);
        assert_eq!(docs_for_worker(2, 4, 10), 3);
        assert_eq!(docs_for_worker(3, 4, 10), 3);
    }

    #[test]
    fn worker_block_offsets_are_consecutive_and_cover_every_document() {
        let num_workers = 3;
        let num_docs = 11;
        let mut expected_start = 0;
        for w in 0..num_workers {
            assert_eq!(first_doc_for_worker(w, num_workers, num_docs), expected_start);
            expected_start += docs_for_worker(w, num_workers, num_docs);
        }
        assert_eq!(expected_start, num_docs);
    }

    #[test]
    fn owner_of_agrees_with_worker_blocks() {
        let num_workers = 3;
        let num_docs = 11;
        for w in 0..num_workers {
            let start = first_doc_for_worker(w, num_workers, num_docs);
            let count = docs_for_worker(w, num_workers, num_docs);
            for doc_id in start..start + count {
                assert_eq!(owner_of(doc_id, num_workers, num_docs), w);
            }
        }
    }

    #[test]
    fn seed_cabinet_wraps_by_modulus() {
        assert_eq!(seed_cabinet(0, 5), 0);
        assert_eq!(seed_cabinet(4, 5), 4);
        assert_eq!(seed_cabinet(5, 5), 0);
        assert_eq!(seed_cabinet(7, 3), 1);
    }

    #[test]
    fn single_worker_owns_every_document() {
        assert_eq!(docs_for_worker(0, 1, 42), 42);
        assert_eq!(first_doc_for_worker(0, 1, 42), 0);
        for doc_id in 0..42 {
            assert_eq!(owner_of(doc_id, 1, 42), 0);
        }
    }
}
