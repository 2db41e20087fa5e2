use std::cell::RefCell;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::{ProcessGroup, ReduceOp};

#[derive(Debug)]
struct Message {
    from: usize,
    payload: Vec<u8>,
}

/// An in-process group with one member per thread, connected by unbounded
/// channels.
///
/// Members follow the usual SPMD discipline: every member calls the same
/// collectives in the same order. Each member owns its handle, so a handle
/// is moved into its rank's thread and never shared.
#[derive(Debug)]
pub struct ThreadGroup {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receiver: Receiver<Message>,
    // messages that arrived ahead of the sender we are waiting on
    stash: RefCell<Vec<Message>>,
}

impl ThreadGroup {
    /// Creates a fully connected group of `size` members; the caller moves
    /// each handle into its own thread.
    #[must_use]
    pub fn new_group(size: usize) -> Vec<ThreadGroup> {
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadGroup {
                rank,
                senders: senders.clone(),
                receiver,
                stash: RefCell::new(Vec::new()),
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> CollectiveResult<()> {
        if rank >= self.senders.len() {
            return Err(CollectiveError::RankOutOfRange {
                rank,
                size: self.senders.len(),
            });
        }
        Ok(())
    }

    fn send_to(&self, to: usize, payload: Vec<u8>) -> CollectiveResult<()> {
        self.check_rank(to)?;
        self.senders[to]
            .send(Message {
                from: self.rank,
                payload,
            })
            .map_err(|_| CollectiveError::Unreachable { rank: to })
    }

    fn recv_from(&self, from: usize) -> CollectiveResult<Vec<u8>> {
        self.check_rank(from)?;

        let mut stash = self.stash.borrow_mut();
        if let Some(index) = stash.iter().position(|m| m.from == from) {
            return Ok(stash.remove(index).payload);
        }

        loop {
            let msg = self
                .receiver
                .recv()
                .map_err(|_| CollectiveError::Unreachable { rank: from })?;
            if msg.from == from {
                return Ok(msg.payload);
            }
            stash.push(msg);
        }
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn barrier(&self) -> CollectiveResult<()> {
        // gather to rank 0, then fan back out
        if self.rank == 0 {
            for from in 1..self.size() {
                self.recv_from(from)?;
            }
            for to in 1..self.size() {
                self.send_to(to, Vec::new())?;
            }
        } else {
            self.send_to(0, Vec::new())?;
            self.recv_from(0)?;
        }
        Ok(())
    }

    fn broadcast(&self, root: usize, data: &mut Vec<u8>) -> CollectiveResult<()> {
        self.check_rank(root)?;
        if self.rank == root {
            for to in 0..self.size() {
                if to != root {
                    self.send_to(to, data.clone())?;
                }
            }
        } else {
            *data = self.recv_from(root)?;
        }
        Ok(())
    }

    fn allreduce(&self, value: i64, op: ReduceOp) -> CollectiveResult<i64> {
        let reduced = self.reduce(0, value, op)?;
        let mut payload = reduced.unwrap_or(0).to_le_bytes().to_vec();
        self.broadcast(0, &mut payload)?;
        Ok(decode_i64(&payload)?)
    }

    fn reduce(&self, root: usize, value: i64, op: ReduceOp) -> CollectiveResult<Option<i64>> {
        self.check_rank(root)?;
        if self.rank == root {
            let mut acc = value;
            for from in 0..self.size() {
                if from != root {
                    acc = op.apply(acc, decode_i64(&self.recv_from(from)?)?);
                }
            }
            Ok(Some(acc))
        } else {
            self.send_to(root, value.to_le_bytes().to_vec())?;
            Ok(None)
        }
    }

    fn scan_sum(&self, value: i64) -> CollectiveResult<i64> {
        if self.rank == 0 {
            let mut values = vec![0i64; self.size()];
            values[0] = value;
            for from in 1..self.size() {
                values[from] = decode_i64(&self.recv_from(from)?)?;
            }
            let mut running = 0;
            let mut own = 0;
            for (rank, v) in values.iter().enumerate() {
                running += v;
                if rank == 0 {
                    own = running;
                } else {
                    self.send_to(rank, running.to_le_bytes().to_vec())?;
                }
            }
            Ok(own)
        } else {
            self.send_to(0, value.to_le_bytes().to_vec())?;
            decode_i64(&self.recv_from(0)?)
        }
    }

    fn send(&self, to: usize, data: &[u8]) -> CollectiveResult<()> {
        self.send_to(to, data.to_vec())
    }

    fn recv(&self, from: usize) -> CollectiveResult<Vec<u8>> {
        self.recv_from(from)
    }
}

fn decode_i64(payload: &[u8]) -> CollectiveResult<i64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| CollectiveError::Payload(format!("expected 8 bytes, got {}", payload.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_group<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadGroup) -> T + Send + Sync + Clone + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = ThreadGroup::new_group(size)
            .into_iter()
            .map(|member| {
                let f = f.clone();
                thread::spawn(move || f(member))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn allreduce_max_agrees() {
        let results = run_group(4, |g| {
            g.allreduce(g.rank() as i64 * 10, ReduceOp::Max).unwrap()
        });
        assert_eq!(results, vec![30, 30, 30, 30]);
    }

    #[test]
    fn logical_and_detects_any_failure() {
        let results = run_group(3, |g| g.agree(g.rank() != 1).unwrap());
        assert_eq!(results, vec![false, false, false]);
    }

    #[test]
    fn broadcast_delivers_root_payload() {
        let results = run_group(3, |g| {
            let mut data = if g.rank() == 1 {
                b"from root".to_vec()
            } else {
                Vec::new()
            };
            g.broadcast(1, &mut data).unwrap();
            data
        });
        for payload in results {
            assert_eq!(payload, b"from root");
        }
    }

    #[test]
    fn scan_sum_is_inclusive_prefix() {
        let results = run_group(4, |g| g.scan_sum(g.rank() as i64 + 1).unwrap());
        assert_eq!(results, vec![1, 3, 6, 10]);
    }

    #[test]
    fn ring_exchange_rotates_payloads() {
        let results = run_group(4, |g| {
            let size = g.size();
            let right = (g.rank() + 1) % size;
            let left = (g.rank() + size - 1) % size;
            let out = vec![g.rank() as u8];
            g.sendrecv(right, &out, left).unwrap()
        });
        assert_eq!(results, vec![vec![3], vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn barrier_completes() {
        run_group(5, |g| g.barrier().unwrap());
    }
}
