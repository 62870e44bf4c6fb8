//! Integration tests that exercise the full pipeline (header parse → chunk dispatch → converge →
//! gather → output file) through the public module API, rather than the in-process `converge`
//! unit tests in `controller.rs` that start from an already-built `Run`.

use std::io::Write;
use std::path::{Path, PathBuf};

use cabinets::collective::single::SingleBackend;
use cabinets::collective::thread::ThreadTeam;
use cabinets::{controller, input, output, Run};

fn unique_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cabinets-e2e-{name}-{:?}.in", std::thread::current().id()))
}

fn write_input(path: &Path, contents: &str) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
}

fn run_single(path: &Path, cabinet_override: Option<usize>) -> Vec<usize> {
    let collective = SingleBackend;
    let (config, shard) = input::distribute(&collective, path, cabinet_override).unwrap();
    let mut run = Run::new(config, shard, collective);
    controller::converge(&mut run).unwrap();
    output::gather_and_write(&run.collective, &run.shard, run.config.num_documents, path).unwrap();
    read_output_cabinets(path)
}

fn read_output_cabinets(input_path: &Path) -> Vec<usize> {
    let output_path = output::derive_output_path(input_path);
    let contents = std::fs::read_to_string(&output_path).unwrap();
    contents
        .lines()
        .map(|line| {
            let mut parts = line.split_whitespace();
            let _id: usize = parts.next().unwrap().parse().unwrap();
            parts.next().unwrap().parse().unwrap()
        })
        .collect()
}

fn run_threaded(path: &Path, cabinet_override: Option<usize>, num_workers: usize) -> Vec<usize> {
    let (c_default, _d, s) = input::peek_header(path).unwrap();
    let num_cabinets = cabinet_override.unwrap_or(c_default);
    let team = ThreadTeam::new(num_workers, num_cabinets * s, num_cabinets, 3);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_workers)
            .map(|rank| {
                let collective = team.handle(rank);
                scope.spawn(move || {
                    let (config, shard) = input::distribute(&collective, path, cabinet_override).unwrap();
                    let mut run = Run::new(config, shard, collective);
                    controller::converge(&mut run).unwrap();
                    output::gather_and_write(&run.collective, &run.shard, run.config.num_documents, path).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });

    read_output_cabinets(path)
}

#[test]
fn two_cluster_corpus_partitions_by_proximity_single_worker() {
    let path = unique_path("two-cluster");
    write_input(
        &path,
        "2 4 2\n0 0.0 0.0\n1 0.0 1.0\n2 10.0 10.0\n3 10.0 11.0\n",
    );
    let cabinets = run_single(&path, None);
    assert_eq!(cabinets[0], cabinets[1]);
    assert_eq!(cabinets[2], cabinets[3]);
    assert_ne!(cabinets[0], cabinets[2]);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn degenerate_single_subject_input_is_accepted() {
    let path = unique_path("degenerate-s1");
    write_input(&path, "2 3 1\n0 1.0\n1 2.0\n2 3.0\n");
    let cabinets = run_single(&path, None);
    assert_eq!(cabinets.len(), 3);
    for c in &cabinets {
        assert!(*c < 2);
    }
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn identical_documents_all_stay_in_their_seed_cabinets() {
    let path = unique_path("identical");
    write_input(&path, "3 6 1\n0 7.0\n1 7.0\n2 7.0\n3 7.0\n4 7.0\n5 7.0\n");
    let cabinets = run_single(&path, None);
    let expected: Vec<usize> = (0..6).map(|d| d % 3).collect();
    assert_eq!(cabinets, expected);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn cabinet_count_override_takes_precedence_over_the_header_default() {
    let path = unique_path("override");
    write_input(&path, "2 4 1\n0 1.0\n1 2.0\n2 3.0\n3 4.0\n");
    let cabinets = run_single(&path, Some(4));
    // C = D = 4: every document keeps its distinct seed cabinet.
    assert_eq!(cabinets, vec![0, 1, 2, 3]);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn single_worker_and_four_thread_workers_agree_on_the_same_corpus() {
    let path = unique_path("parallel-equivalence");
    let mut contents = String::from("3 30 2\n");
    for d in 0..30 {
        let base = if d < 15 { 0.0 } else { 50.0 };
        contents.push_str(&format!("{d} {} {}\n", base + (d % 3) as f64, base + (d % 2) as f64));
    }
    write_input(&path, &contents);

    let single_result = run_single(&path, None);
    let threaded_result = run_threaded(&path, None, 4);
    assert_eq!(single_result, threaded_result);

    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn rerunning_on_an_already_converged_input_changes_nothing() {
    let path = unique_path("reconverge");
    write_input(
        &path,
        "2 4 2\n0 0.0 0.0\n1 0.0 1.0\n2 10.0 10.0\n3 10.0 11.0\n",
    );
    let first = run_single(&path, None);
    let second = run_single(&path, None);
    assert_eq!(first, second);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(output::derive_output_path(&path));
}

#[test]
fn malformed_input_is_reported_as_an_error_not_a_panic() {
    let path = unique_path("malformed");
    write_input(&path, "2 2 2\n0 1.0\n1 2.0 3.0\n"); // first document line is short a token
    let collective = SingleBackend;
    let result = input::distribute(&collective, &path, None);
    assert!(result.is_err());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_input_file_is_reported_as_an_error_not_a_panic() {
    let path = unique_path("does-not-exist");
    let collective = SingleBackend;
    let result = input::distribute(&collective, &path, None);
    assert!(result.is_err());
}

#[test]
fn universal_invariants_hold_after_convergence() {
    // Three well-separated triples of points, C = 3.
    let path = unique_path("invariants");
    write_input(
        &path,
        "3 9 2\n\
         0 0.0 0.0\n1 0.0 1.0\n2 1.0 0.0\n\
         3 10.0 10.0\n4 10.0 11.0\n5 11.0 10.0\n\
         6 50.0 -5.0\n7 51.0 -4.0\n8 49.0 -6.0\n",
    );

    let collective = SingleBackend;
    let (config, shard) = input::distribute(&collective, &path, None).unwrap();
    let mut run = Run::new(config, shard, collective);
    controller::converge(&mut run).unwrap();

    let num_documents = run.config.num_documents;
    let num_cabinets = run.config.num_cabinets;
    let num_subjects = run.config.num_subjects;

    // Every document's current cabinet is in [0, C).
    for local_idx in 0..run.shard.local_docs() {
        assert!(run.shard.assignment(local_idx) < num_cabinets);
    }

    // Sigma_c n_c = D.
    let population_sum: i64 = (0..num_cabinets).map(|c| run.centroids.population(c)).sum();
    assert_eq!(population_sum, num_documents as i64);

    // For every cabinet with n_c > 0, mu_c equals the arithmetic mean of the documents currently
    // assigned to it, to within 1e-9 relative error per component.
    for c in 0..num_cabinets {
        let n_c = run.centroids.population(c);
        if n_c == 0 {
            continue;
        }

        let mut sum = vec![0.0; num_subjects];
        let mut count = 0i64;
        for local_idx in 0..run.shard.local_docs() {
            if run.shard.assignment(local_idx) == c {
                let subj = run.shard.subjects(local_idx);
                for i in 0..num_subjects {
                    sum[i] += subj[i];
                }
                count += 1;
            }
        }
        assert_eq!(count, n_c);

        let centroid = run.centroids.row(c);
        for i in 0..num_subjects {
            let mean = sum[i] / count as f64;
            let relative_error =
                if mean.abs() > 1e-12 { (centroid[i] - mean).abs() / mean.abs() } else { (centroid[i] - mean).abs() };
            assert!(
                relative_error < 1e-9,
                "cabinet {c} component {i}: centroid {} vs mean {mean}",
                centroid[i]
            );
        }
    }

    let _ = std::fs::remove_file(&path);
}
