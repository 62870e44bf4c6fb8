//! Initial chunked distribution of the input file from coordinator to workers (§4.7). Everything
//! here is ambient plumbing around the core: the header/line grammar is simple enough that it
//! gets a few direct parsing functions rather than a separate parser abstraction, but it never
//! touches centroid or accumulator state directly — it only ever produces a [`LocalShard`] and
//! hands it to the rest of the crate.

use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::collective::{Collective, Tag};
use crate::error::{Error, Result};
use crate::partition::{docs_for_worker, first_doc_for_worker, seed_cabinet};
use crate::run::RunConfig;
use crate::shard::LocalShard;

/// Lines longer than this are rejected outright (§6).
const MAX_LINE_BYTES: usize = 20_000;

/// Parses the header line `C_default D S`.
fn parse_header(line: &str) -> std::result::Result<(usize, usize, usize), String> {
    let mut parts = line.split_whitespace();
    let c = parts.next().ok_or("missing cabinet count")?;
    let d = parts.next().ok_or("missing document count")?;
    let s = parts.next().ok_or("missing subject count")?;
    let c: usize = c.parse().map_err(|_| format!("cabinet count {c:?} is not an integer"))?;
    let d: usize = d.parse().map_err(|_| format!("document count {d:?} is not an integer"))?;
    let s: usize = s.parse().map_err(|_| format!("subject count {s:?} is not an integer"))?;
    Ok((c, d, s))
}

/// Parses one document line `id v_0 v_1 … v_{S-1}`, checking that `id` matches the expected
/// position and that there are exactly `num_subjects` values.
fn parse_document_line(
    line: &str,
    expected_id: usize,
    num_subjects: usize,
    line_no: usize,
) -> Result<Vec<f64>> {
    let mut tokens = line.split_whitespace();
    let id_token = tokens.next().ok_or_else(|| Error::InputMalformed {
        line: line_no,
        reason: "empty line where a document was expected".into(),
    })?;
    let id: usize = id_token.parse().map_err(|_| Error::InputMalformed {
        line: line_no,
        reason: format!("document id {id_token:?} is not an integer"),
    })?;
    if id != expected_id {
        return Err(Error::InputMalformed {
            line: line_no,
            reason: format!("expected document id {expected_id}, found {id}"),
        });
    }

    let mut values = Vec::with_capacity(num_subjects);
    for token in tokens.by_ref() {
        values.push(token.parse::<f64>().map_err(|_| Error::InputMalformed {
            line: line_no,
            reason: format!("subject value {token:?} is not a real number"),
        })?);
    }
    if values.len() != num_subjects {
        return Err(Error::InputMalformed {
            line: line_no,
            reason: format!("expected {num_subjects} subject values, found {}", values.len()),
        });
    }
    Ok(values)
}

/// Splits an already-read input file into one concatenated raw-line buffer per worker, in
/// worker-index order, following the §4.1 ownership split.
fn split_into_worker_chunks(
    lines: &[String],
    num_workers: usize,
    num_documents: usize,
) -> Vec<Vec<u8>> {
    let mut chunks = Vec::with_capacity(num_workers);
    let mut cursor = 0;
    for w in 0..num_workers {
        let count = docs_for_worker(w, num_workers, num_documents);
        let mut buf = Vec::new();
        for line in &lines[cursor..cursor + count] {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        chunks.push(buf);
        cursor += count;
    }
    chunks
}

/// Tokenizes one worker's raw chunk into a flat subjects buffer and the seed assignment.
fn parse_chunk(
    chunk: &[u8],
    first_global_id: usize,
    local_count: usize,
    num_subjects: usize,
    num_cabinets: usize,
) -> Result<(Vec<f64>, Vec<usize>)> {
    let mut subjects = Vec::with_capacity(local_count * num_subjects);
    let mut assignment = Vec::with_capacity(local_count);

    let mut seen = 0;
    for (offset, raw_line) in chunk.split(|&b| b == b'\n').enumerate() {
        if raw_line.is_empty() {
            continue;
        }
        let line = std::str::from_utf8(raw_line).map_err(|_| Error::InputMalformed {
            line: first_global_id + offset,
            reason: "document line is not valid UTF-8".into(),
        })?;
        let global_id = first_global_id + seen;
        let values = parse_document_line(line, global_id, num_subjects, global_id)?;
        subjects.extend_from_slice(&values);
        assignment.push(seed_cabinet(global_id, num_cabinets));
        seen += 1;
    }

    if seen != local_count {
        return Err(Error::InputMalformed {
            line: first_global_id,
            reason: format!("expected {local_count} documents in this worker's chunk, found {seen}"),
        });
    }
    Ok((subjects, assignment))
}

fn encode_len(len: usize) -> [u8; 8] {
    (len as u64).to_le_bytes()
}

fn decode_len(bytes: [u8; 8]) -> usize {
    u64::from_le_bytes(bytes) as usize
}

/// Reads (at the coordinator) or receives (everywhere else) this run's dimensions and this
/// worker's slice of documents, and returns a ready-to-use [`LocalShard`] with its accumulators
/// already seeded from the initial `a_d = d mod C` assignment (§4.1, §4.6's iteration-0 special
/// case).
///
/// Every worker must call this with the same `path` and `cabinet_override` — they're only ever
/// read by the coordinator, but a mismatched call across workers is the same kind of programmer
/// error a mismatched collective call is (§5).
pub fn distribute<C: Collective>(
    collective: &C,
    path: &Path,
    cabinet_override: Option<usize>,
) -> Result<(RunConfig, LocalShard)> {
    let is_coordinator = collective.rank() == 0;
    let num_workers = collective.size();

    // Header/dimension exchange: the coordinator always broadcasts *something*, even a failure
    // sentinel, so non-coordinators never block waiting for a header that will never arrive (§7).
    let mut dims = [0usize; 3];
    let mut coordinator_error = None;
    let mut all_lines: Vec<String> = Vec::new();

    if is_coordinator {
        match read_header_and_lines(path) {
            Ok((c_default, d, s, lines)) => {
                dims = [cabinet_override.unwrap_or(c_default), d, s];
                all_lines = lines;
            }
            Err(err) => coordinator_error = Some(err),
        }
    }
    collective.broadcast_usize(&mut dims, 0)?;

    if let Some(err) = coordinator_error {
        return Err(err);
    }
    if !is_coordinator && dims == [0, 0, 0] {
        return Err(Error::ConfigInvalid("coordinator reported a fatal input error".into()));
    }

    let (num_cabinets, num_documents, num_subjects) = (dims[0], dims[1], dims[2]);
    let config = RunConfig::validate(num_documents, num_subjects, num_cabinets, num_workers)?;

    let rank = collective.rank();
    let first_global_id = first_doc_for_worker(rank, num_workers, num_documents);
    let local_count = docs_for_worker(rank, num_workers, num_documents);

    let chunk = if is_coordinator {
        let chunks = split_into_worker_chunks(&all_lines, num_workers, num_documents);
        for (worker, chunk) in chunks.iter().enumerate().skip(1) {
            collective.send_bytes(&encode_len(chunk.len()), worker, Tag::ChunkLen)?;
            collective.send_bytes(chunk, worker, Tag::ChunkBytes)?;
        }
        chunks.into_iter().next().unwrap_or_default()
    } else {
        let mut len_bytes = [0u8; 8];
        collective.recv_bytes(&mut len_bytes, 0, Tag::ChunkLen)?;
        let mut buf = vec![0u8; decode_len(len_bytes)];
        collective.recv_bytes(&mut buf, 0, Tag::ChunkBytes)?;
        buf
    };

    let (subjects, assignment) =
        parse_chunk(&chunk, first_global_id, local_count, num_subjects, num_cabinets)?;

    let mut shard = LocalShard::new(first_global_id, num_subjects, num_cabinets, subjects, assignment);
    shard.seed_accumulators();
    Ok((config, shard))
}

/// Reads just the header line, without touching the document lines that follow.
///
/// Used by the application shell to size the in-process thread backend's shared buffers before
/// any worker thread exists — the thread backend's buffers are allocated once at construction
/// and never resized (§5), so `C` and `S` must be known before the team is built. The coordinator
/// thread reads the header again, from scratch, inside [`distribute`]; re-reading one line is
/// cheaper than threading a pre-parsed header through the collective API.
pub fn peek_header(path: &Path) -> Result<(usize, usize, usize)> {
    let file = std::fs::File::open(path).map_err(|source| Error::InputOpenFailed { path: path.to_path_buf(), source })?;
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    reader
        .read_line(&mut header)
        .map_err(|source| Error::InputOpenFailed { path: path.to_path_buf(), source })?;
    parse_header(header.trim_end()).map_err(|reason| Error::InputMalformed { line: 0, reason })
}

fn read_header_and_lines(path: &Path) -> Result<(usize, usize, usize, Vec<String>)> {
    let file = std::fs::File::open(path).map_err(|source| Error::InputOpenFailed { path: path.to_path_buf(), source })?;
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    reader
        .read_line(&mut header)
        .map_err(|source| Error::InputOpenFailed { path: path.to_path_buf(), source })?;
    let (c_default, d, s) = parse_header(header.trim_end()).map_err(|reason| Error::InputMalformed { line: 0, reason })?;

    let mut lines = Vec::with_capacity(d);
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| Error::InputOpenFailed { path: path.to_path_buf(), source })?;
        if line.len() > MAX_LINE_BYTES {
            return Err(Error::InputMalformed { line: idx + 1, reason: "line exceeds the 20,000 byte limit".into() });
        }
        lines.push(line);
        if lines.len() == d {
            break;
        }
    }
    if lines.len() != d {
        return Err(Error::InputMalformed {
            line: lines.len() + 1,
            reason: format!("header declared {d} documents but only {} lines followed", lines.len()),
        });
    }
    Ok((c_default, d, s, lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_reads_three_integers() {
        assert_eq!(parse_header("2 4 2").unwrap(), (2, 4, 2));
    }

    #[test]
    fn parse_header_rejects_missing_fields() {
        assert!(parse_header("2 4").is_err());
    }

    #[test]
    fn parse_document_line_checks_id_and_arity() {
        let values = parse_document_line("3 1.0 2.0", 3, 2, 3).unwrap();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn parse_document_line_rejects_id_mismatch() {
        assert!(parse_document_line("3 1.0 2.0", 4, 2, 3).is_err());
    }

    #[test]
    fn parse_document_line_rejects_wrong_arity() {
        assert!(parse_document_line("3 1.0", 3, 2, 3).is_err());
    }

    #[test]
    fn split_into_worker_chunks_respects_the_partitioner_split() {
        let lines: Vec<String> = (0..5).map(|i| format!("{i} 0.0")).collect();
        let chunks = split_into_worker_chunks(&lines, 2, 5);
        assert_eq!(chunks.len(), 2);
        // 5 docs over 2 workers: worker 0 gets 2, worker 1 gets 3.
        assert_eq!(chunks[0].iter().filter(|&&b| b == b'\n').count(), 2);
        assert_eq!(chunks[1].iter().filter(|&&b| b == b'\n').count(), 3);
    }

    #[test]
    fn parse_chunk_seeds_cabinets_by_global_id() {
        let chunk = b"2 1.0 2.0\n3 3.0 4.0\n".to_vec();
        let (subjects, assignment) = parse_chunk(&chunk, 2, 2, 2, 2).unwrap();
        assert_eq!(subjects, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assignment, vec![0, 1]); // 2 % 2 = 0, 3 % 2 = 1
    }

    #[test]
    fn encode_decode_len_roundtrips() {
        assert_eq!(decode_len(encode_len(12345)), 12345);
    }

    #[test]
    fn peek_header_reads_only_the_first_line() {
        let path = std::env::temp_dir().join(format!("cabinets-peek-test-{:?}.in", std::thread::current().id()));
        std::fs::write(&path, "3 2 1\nnot a valid document line at all\n").unwrap();
        assert_eq!(peek_header(&path).unwrap(), (3, 2, 1));
        let _ = std::fs::remove_file(&path);
    }
}
