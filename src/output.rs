//! Final gather and output-file write (§4.7, §6). The coordinator is the only process that ever
//! touches the output file; every other worker's contribution arrives as one point-to-point
//! message.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::collective::{Collective, Tag};
use crate::error::{Error, Result};
use crate::partition::{docs_for_worker, first_doc_for_worker};
use crate::shard::LocalShard;

/// The input path with its last three characters replaced by `out` (§6).
pub fn derive_output_path(input_path: &Path) -> PathBuf {
    let raw = input_path.as_os_str().to_string_lossy().into_owned();
    let cut = raw.len().saturating_sub(3);
    let mut replaced = raw[..cut].to_string();
    replaced.push_str("out");
    PathBuf::from(replaced)
}

fn encode_assignment(assignment: &[usize]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(assignment.len() * 8);
    for &a in assignment {
        bytes.extend_from_slice(&(a as u64).to_le_bytes());
    }
    bytes
}

fn decode_assignment(bytes: &[u8]) -> Vec<usize> {
    bytes.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap()) as usize).collect()
}

/// Every non-coordinator worker sends its local `a_d` array (local index order) to the
/// coordinator, which concatenates its own block first, then each remote worker's block in
/// worker-index order, and writes one `<global_doc_id> <cabinet>\n` line per document.
pub fn gather_and_write<C: Collective>(
    collective: &C,
    shard: &LocalShard,
    num_documents: usize,
    input_path: &Path,
) -> Result<()> {
    let is_coordinator = collective.rank() == 0;
    let num_workers = collective.size();

    if !is_coordinator {
        let local: Vec<usize> = (0..shard.local_docs()).map(|i| shard.assignment(i)).collect();
        return collective.send_bytes(&encode_assignment(&local), 0, Tag::Assignments);
    }

    let output_path = derive_output_path(input_path);
    let file = std::fs::File::create(&output_path)
        .map_err(|source| Error::OutputWriteFailed { path: output_path.clone(), source })?;
    let mut writer = std::io::BufWriter::new(file);

    let write_block = |writer: &mut std::io::BufWriter<std::fs::File>, first_global_id: usize, assignment: &[usize]| -> Result<()> {
        for (local_idx, &cabinet) in assignment.iter().enumerate() {
            writeln!(writer, "{} {}", first_global_id + local_idx, cabinet)
                .map_err(|source| Error::OutputWriteFailed { path: output_path.clone(), source })?;
        }
        Ok(())
    };

    let own: Vec<usize> = (0..shard.local_docs()).map(|i| shard.assignment(i)).collect();
    write_block(&mut writer, first_doc_for_worker(0, num_workers, num_documents), &own)?;

    for worker in 1..num_workers {
        let count = docs_for_worker(worker, num_workers, num_documents);
        let mut buf = vec![0u8; count * 8];
        collective.recv_bytes(&mut buf, worker, Tag::Assignments)?;
        let assignment = decode_assignment(&buf);
        write_block(&mut writer, first_doc_for_worker(worker, num_workers, num_documents), &assignment)?;
    }

    writer
        .flush()
        .map_err(|source| Error::OutputWriteFailed { path: output_path, source })
}
