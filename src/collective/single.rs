//! The degenerate, single-worker collective backend. `W` is fixed at 1, so every collective is a
//! local no-op: broadcast and reduce-sum act as identity, all-reduce-sum returns its input
//! unchanged, and send/recv are unreachable since there is no peer to address.
//!
//! This is the serial case the original spec described as out of scope for the core proper; it's
//! folded back in here so the crate has a mode that needs no collective runtime at all.

use super::{Collective, Tag};
use crate::error::Result;

pub struct SingleBackend;

impl Collective for SingleBackend {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_f64(&self, _buffer: &mut [f64], root: usize) -> Result<()> {
        debug_assert_eq!(root, 0);
        Ok(())
    }

    fn broadcast_usize(&self, _buffer: &mut [usize], root: usize) -> Result<()> {
        debug_assert_eq!(root, 0);
        Ok(())
    }

    fn reduce_sum_f64(&self, input: &[f64], output: &mut [f64], root: usize) -> Result<()> {
        debug_assert_eq!(root, 0);
        output.copy_from_slice(input);
        Ok(())
    }

    fn reduce_sum_i64(&self, input: &[i64], output: &mut [i64], root: usize) -> Result<()> {
        debug_assert_eq!(root, 0);
        output.copy_from_slice(input);
        Ok(())
    }

    fn allreduce_sum_i64(&self, value: i64) -> Result<i64> {
        Ok(value)
    }

    fn allreduce_sum_f64(&self, value: f64) -> Result<f64> {
        Ok(value)
    }

    fn send_bytes(&self, _buffer: &[u8], _dest: usize, _tag: Tag) -> Result<()> {
        unreachable!("a single-worker run has no peer to send to")
    }

    fn recv_bytes(&self, _buffer: &mut [u8], _src: usize, _tag: Tag) -> Result<()> {
        unreachable!("a single-worker run has no peer to receive from")
    }
}
