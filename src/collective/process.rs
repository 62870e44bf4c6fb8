//! The real multi-process collective backend, feature-gated behind `process`.
//!
//! This is built on `timely_communication`'s allocator rather than on MPI directly, so the whole
//! crate stays inside one dependency ecosystem (§9's resolution of the "multi-process transport"
//! open question). `Allocate::allocate` hands out one push end per peer plus one pull end for a
//! given channel identifier; everything below is the fixed message pattern that turns those
//! point-to-point channels into the four collectives §4.5 asks for. Each logical collective
//! (the centroid broadcast, the delta-sum reduce, the delta-count reduce, the moved all-reduce,
//! and the two point-to-point exchanges) gets its own channel identifier, allocated once when the
//! backend is constructed and reused for the life of the run.

use std::sync::Mutex;

use timely_communication::{Allocate, Data, Message, Pull, Push};

use super::{Collective, Tag};
use crate::error::{Error, Result};

const CHAN_BROADCAST_F64: usize = 0;
const CHAN_BROADCAST_USIZE: usize = 1;
const CHAN_REDUCE_F64: usize = 2;
const CHAN_REDUCE_I64: usize = 3;
const CHAN_ALLREDUCE: usize = 4;
const CHAN_ALLREDUCE_F64: usize = 5;
const CHAN_P2P_BASE: usize = 100;

struct Channels<T> {
    pushers: Vec<Box<dyn Push<Message<T>>>>,
    puller: Box<dyn Pull<Message<T>>>,
}

/// A collective backend addressing real OS processes through `timely_communication`.
pub struct ProcessBackend {
    index: usize,
    peers: usize,
    f64_broadcast: Mutex<Channels<Vec<f64>>>,
    usize_broadcast: Mutex<Channels<Vec<usize>>>,
    f64_reduce: Mutex<Channels<Vec<f64>>>,
    i64_reduce: Mutex<Channels<Vec<i64>>>,
    allreduce: Mutex<Channels<i64>>,
    allreduce_f64: Mutex<Channels<f64>>,
    p2p: Mutex<Channels<Vec<u8>>>,
}

impl ProcessBackend {
    /// Allocates every channel this backend will ever use against `allocator`. Called once,
    /// before the iteration controller starts, from inside the closure `timely_communication`
    /// hands a freshly-spawned worker.
    pub fn new<A: Allocate>(allocator: &mut A) -> Self {
        let (f64_b_push, f64_b_pull) = allocator.allocate(CHAN_BROADCAST_F64);
        let (usize_b_push, usize_b_pull) = allocator.allocate(CHAN_BROADCAST_USIZE);
        let (f64_r_push, f64_r_pull) = allocator.allocate(CHAN_REDUCE_F64);
        let (i64_r_push, i64_r_pull) = allocator.allocate(CHAN_REDUCE_I64);
        let (ar_push, ar_pull) = allocator.allocate(CHAN_ALLREDUCE);
        let (arf_push, arf_pull) = allocator.allocate(CHAN_ALLREDUCE_F64);
        let (p2p_push, p2p_pull) = allocator.allocate(CHAN_P2P_BASE);

        ProcessBackend {
            index: allocator.index(),
            peers: allocator.peers(),
            f64_broadcast: Mutex::new(Channels { pushers: f64_b_push, puller: f64_b_pull }),
            usize_broadcast: Mutex::new(Channels { pushers: usize_b_push, puller: usize_b_pull }),
            f64_reduce: Mutex::new(Channels { pushers: f64_r_push, puller: f64_r_pull }),
            i64_reduce: Mutex::new(Channels { pushers: i64_r_push, puller: i64_r_pull }),
            allreduce: Mutex::new(Channels { pushers: ar_push, puller: ar_pull }),
            allreduce_f64: Mutex::new(Channels { pushers: arf_push, puller: arf_pull }),
            p2p: Mutex::new(Channels { pushers: p2p_push, puller: p2p_pull }),
        }
    }

    fn broadcast_generic<T: Data + Clone>(
        &self,
        channels: &Mutex<Channels<T>>,
        value: &mut T,
        root: usize,
    ) -> Result<()> {
        let mut channels = channels.lock().unwrap();
        if self.index == root {
            for peer in 0..self.peers {
                if peer != self.index {
                    let mut payload = Some(value.clone());
                    channels.pushers[peer].push(&mut payload);
                }
            }
        } else {
            loop {
                if let Some(message) = channels.puller.pull().take() {
                    *value = Message::into_typed(message);
                    break;
                }
            }
        }
        Ok(())
    }

    fn reduce_generic<T, F>(
        &self,
        channels: &Mutex<Channels<T>>,
        mut contribution: T,
        root: usize,
        combine: F,
    ) -> Result<T>
    where
        T: Data + Clone,
        F: Fn(&mut T, T),
    {
        let mut channels = channels.lock().unwrap();
        if self.index == root {
            let mut received = 0;
            while received < self.peers - 1 {
                if let Some(message) = channels.puller.pull().take() {
                    combine(&mut contribution, Message::into_typed(message));
                    received += 1;
                }
            }
            Ok(contribution)
        } else {
            let mut payload = Some(contribution);
            channels.pushers[root].push(&mut payload);
            Ok(payload.take().unwrap_or_else(|| unreachable!()))
        }
    }
}

impl Collective for ProcessBackend {
    fn rank(&self) -> usize {
        self.index
    }

    fn size(&self) -> usize {
        self.peers
    }

    fn broadcast_f64(&self, buffer: &mut [f64], root: usize) -> Result<()> {
        let mut owned = buffer.to_vec();
        self.broadcast_generic(&self.f64_broadcast, &mut owned, root)?;
        buffer.copy_from_slice(&owned);
        Ok(())
    }

    fn broadcast_usize(&self, buffer: &mut [usize], root: usize) -> Result<()> {
        let mut owned = buffer.to_vec();
        self.broadcast_generic(&self.usize_broadcast, &mut owned, root)?;
        buffer.copy_from_slice(&owned);
        Ok(())
    }

    fn reduce_sum_f64(&self, input: &[f64], output: &mut [f64], root: usize) -> Result<()> {
        let summed = self.reduce_generic(&self.f64_reduce, input.to_vec(), root, |acc, rhs| {
            for i in 0..acc.len() {
                acc[i] += rhs[i];
            }
        })?;
        if self.index == root {
            output.copy_from_slice(&summed);
        }
        Ok(())
    }

    fn reduce_sum_i64(&self, input: &[i64], output: &mut [i64], root: usize) -> Result<()> {
        let summed = self.reduce_generic(&self.i64_reduce, input.to_vec(), root, |acc, rhs| {
            for i in 0..acc.len() {
                acc[i] += rhs[i];
            }
        })?;
        if self.index == root {
            output.copy_from_slice(&summed);
        }
        Ok(())
    }

    fn allreduce_sum_i64(&self, value: i64) -> Result<i64> {
        let root = 0;
        let summed = self.reduce_generic(&self.allreduce, value, root, |acc, rhs| *acc += rhs)?;
        let mut broadcast_value = if self.index == root { summed } else { 0 };
        self.broadcast_generic(&self.allreduce, &mut broadcast_value, root)?;
        Ok(broadcast_value)
    }

    fn allreduce_sum_f64(&self, value: f64) -> Result<f64> {
        let root = 0;
        let summed = self.reduce_generic(&self.allreduce_f64, value, root, |acc, rhs| *acc += rhs)?;
        let mut broadcast_value = if self.index == root { summed } else { 0.0 };
        self.broadcast_generic(&self.allreduce_f64, &mut broadcast_value, root)?;
        Ok(broadcast_value)
    }

    fn send_bytes(&self, buffer: &[u8], dest: usize, tag: Tag) -> Result<()> {
        let mut channels = self.p2p.lock().unwrap();
        let mut payload = Some(tagged_payload(tag, buffer));
        channels.pushers[dest].push(&mut payload);
        Ok(())
    }

    fn recv_bytes(&self, buffer: &mut [u8], _src: usize, tag: Tag) -> Result<()> {
        let mut channels = self.p2p.lock().unwrap();
        loop {
            if let Some(message) = channels.puller.pull().take() {
                let payload = Message::into_typed(message);
                if let Some(body) = untag_payload(tag, &payload) {
                    if body.len() != buffer.len() {
                        return Err(Error::CollectiveFailed {
                            operation: "recv",
                            reason: format!("expected {} bytes, got {}", buffer.len(), body.len()),
                        });
                    }
                    buffer.copy_from_slice(body);
                    return Ok(());
                }
            }
        }
    }
}

fn tag_byte(tag: Tag) -> u8 {
    match tag {
        Tag::ChunkLen => 0,
        Tag::ChunkBytes => 1,
        Tag::Assignments => 2,
    }
}

fn tagged_payload(tag: Tag, buffer: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(buffer.len() + 1);
    payload.push(tag_byte(tag));
    payload.extend_from_slice(buffer);
    payload
}

fn untag_payload(tag: Tag, payload: &[u8]) -> Option<&[u8]> {
    if payload.first() == Some(&tag_byte(tag)) {
        Some(&payload[1..])
    } else {
        None
    }
}
