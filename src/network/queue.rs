//! Correlation queue
//!
//! A strict FIFO of pending request handles. The protocol carries no
//! request identifier, so the Nth frame received resolves the Nth command
//! sent; the queue is mutated only by its owning connection's write path
//! (append) and reader thread (pop-and-resolve).

use std::collections::VecDeque;

use crossbeam::channel::Sender;

use crate::error::{ClientError, Result};
use crate::protocol::Response;

/// Completion handle for one outstanding command
pub(crate) type Completion = Sender<Result<Response>>;

/// FIFO of pending request handles, owned by exactly one connection
#[derive(Default)]
pub(crate) struct CorrelationQueue {
    pending: VecDeque<Completion>,
}

impl CorrelationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Enqueue a pending handle. Must happen before the command bytes can
    /// reach the wire, so an already-arrived reply always finds its handle.
    pub(crate) fn push_back(&mut self, completion: Completion) {
        self.pending.push_back(completion);
    }

    /// Dequeue the oldest pending handle for the frame that just arrived
    pub(crate) fn pop_front(&mut self) -> Option<Completion> {
        self.pending.pop_front()
    }

    /// Remove the most recently enqueued handle. Used when the write for
    /// that command failed locally: no byte reached the wire, so no frame
    /// will ever match it.
    pub(crate) fn abandon_tail(&mut self) -> Option<Completion> {
        self.pending.pop_back()
    }

    /// Fail every queued handle with the given error and clear the queue
    pub(crate) fn fail_all<F>(&mut self, error: F)
    where
        F: Fn() -> ClientError,
    {
        for completion in self.pending.drain(..) {
            let _ = completion.send(Err(error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn pops_in_fifo_order() {
        let mut queue = CorrelationQueue::new();
        let (tx1, rx1) = bounded(1);
        let (tx2, rx2) = bounded(1);
        queue.push_back(tx1);
        queue.push_back(tx2);

        let first = queue.pop_front().unwrap();
        first.send(Ok(Response::default())).unwrap();
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        let second = queue.pop_front().unwrap();
        second.send(Ok(Response::default())).unwrap();
        assert!(rx2.try_recv().is_ok());
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn abandon_tail_removes_newest() {
        let mut queue = CorrelationQueue::new();
        let (tx1, _rx1) = bounded(1);
        let (tx2, rx2) = bounded(1);
        queue.push_back(tx1);
        queue.push_back(tx2);

        let abandoned = queue.abandon_tail().unwrap();
        abandoned
            .send(Err(ClientError::Command("write failed".to_string())))
            .unwrap();
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(ClientError::Command(_))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn fail_all_drains_queue() {
        let mut queue = CorrelationQueue::new();
        let (tx1, rx1) = bounded(1);
        let (tx2, rx2) = bounded(1);
        queue.push_back(tx1);
        queue.push_back(tx2);

        queue.fail_all(|| ClientError::Connection("lost".to_string()));
        assert_eq!(queue.len(), 0);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(ClientError::Connection(_))
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(ClientError::Connection(_))
        ));
    }
}
