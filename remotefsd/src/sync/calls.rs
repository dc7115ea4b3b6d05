use std::collections::VecDeque;

use remotefs_core::{CallId, RemoteCall, RemoteRequest};

/// Outgoing remote calls, in dispatch order.
#[derive(Debug, Default)]
pub struct CallQueue {
    next_id: u64,
    inner: VecDeque<RemoteCall>,
}

impl CallQueue {
    pub fn push(&mut self, request: RemoteRequest) -> CallId {
        self.next_id += 1;
        let id = CallId(self.next_id);
        self.inner.push_back(RemoteCall { id, request });
        id
    }

    pub fn drain(&mut self) -> Vec<RemoteCall> {
        self.inner.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = CallQueue::default();
        let first = queue.push(RemoteRequest::List { path: "/A".into() });
        let second = queue.push(RemoteRequest::Delete { path: "/B".into() });
        assert!(first < second);
        assert_eq!(queue.len(), 2);

        let calls = queue.drain();

        assert_eq!(calls[0].id, first);
        assert_eq!(calls[1].request, RemoteRequest::Delete { path: "/B".into() });
        assert!(queue.is_empty());
    }

    #[test]
    fn ids_keep_increasing_across_drains() {
        let mut queue = CallQueue::default();
        let first = queue.push(RemoteRequest::List { path: "/".into() });
        queue.drain();
        let second = queue.push(RemoteRequest::List { path: "/".into() });
        assert_ne!(first, second);
    }
}
