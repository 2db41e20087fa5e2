use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::{ProcessGroup, ReduceOp};

/// The one-member group: every collective is local and immediate.
///
/// Sends to self queue up and are drained by later receives, so ring code
/// written for larger groups degenerates correctly.
#[derive(Debug, Default)]
pub struct SingleProcess {
    queue: RefCell<VecDeque<Vec<u8>>>,
}

impl SingleProcess {
    /// Creates the group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_rank(rank: usize) -> CollectiveResult<()> {
        if rank != 0 {
            return Err(CollectiveError::RankOutOfRange { rank, size: 1 });
        }
        Ok(())
    }
}

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> CollectiveResult<()> {
        Ok(())
    }

    fn broadcast(&self, root: usize, _data: &mut Vec<u8>) -> CollectiveResult<()> {
        Self::check_rank(root)
    }

    fn allreduce(&self, value: i64, _op: ReduceOp) -> CollectiveResult<i64> {
        Ok(value)
    }

    fn reduce(&self, root: usize, value: i64, _op: ReduceOp) -> CollectiveResult<Option<i64>> {
        Self::check_rank(root)?;
        Ok(Some(value))
    }

    fn scan_sum(&self, value: i64) -> CollectiveResult<i64> {
        Ok(value)
    }

    fn send(&self, to: usize, data: &[u8]) -> CollectiveResult<()> {
        Self::check_rank(to)?;
        self.queue.borrow_mut().push_back(data.to_vec());
        Ok(())
    }

    fn recv(&self, from: usize) -> CollectiveResult<Vec<u8>> {
        Self::check_rank(from)?;
        self.queue
            .borrow_mut()
            .pop_front()
            .ok_or(CollectiveError::Unreachable { rank: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectives_are_identity() {
        let g = SingleProcess::new();
        assert_eq!(g.rank(), 0);
        assert_eq!(g.size(), 1);
        g.barrier().unwrap();
        assert_eq!(g.allreduce(7, ReduceOp::Max).unwrap(), 7);
        assert_eq!(g.scan_sum(5).unwrap(), 5);
        assert_eq!(g.reduce(0, 3, ReduceOp::Sum).unwrap(), Some(3));
        assert!(g.agree(true).unwrap());
        assert!(!g.agree(false).unwrap());
        assert_eq!(g.sendrecv(0, b"ring", 0).unwrap(), b"ring");
    }

    #[test]
    fn foreign_rank_is_rejected() {
        let g = SingleProcess::new();
        assert!(g.reduce(1, 0, ReduceOp::Sum).is_err());
    }
}
