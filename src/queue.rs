/*! Bounded blocking queues connecting the pipeline stages.

Every stage boundary is one of these: `Mutex<VecDeque>` plus two
condvars, a fixed capacity, and a close flag. The three operations the
pipeline needs are:

* [`Queue::put`]: block until there is room. Used where dropping is
  not acceptable (downmix → demod).
* [`Queue::add`]: never block, report `Full`. Used by the early stages
  so that overload sheds cheap data instead of stalling the SDR.
* [`Queue::take`]: block until there is an element, or the queue is
  closed *and* drained.

Closing wakes every waiter; producers get `Closed` from then on, and
consumers drain whatever is left before seeing `None`.
*/
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Why a non-blocking add was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddError {
    /// Queue was at capacity.
    Full,
    /// Queue has been closed.
    Closed,
}

struct Inner<T> {
    q: VecDeque<T>,
    closed: bool,
    max_depth: usize,
}

/// A bounded blocking MPMC queue with a close signal.
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Create a queue holding at most `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(Inner {
                q: VecDeque::new(),
                closed: false,
                max_depth: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    /// Blocking push. Returns the value back if the queue is closed.
    pub fn put(&self, val: T) -> Result<(), T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(val);
            }
            if inner.q.len() < self.capacity {
                inner.q.push_back(val);
                inner.max_depth = inner.max_depth.max(inner.q.len());
                self.readable.notify_one();
                return Ok(());
            }
            inner = self.writable.wait(inner).unwrap();
        }
    }

    /// Non-blocking push.
    pub fn add(&self, val: T) -> Result<(), (T, AddError)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err((val, AddError::Closed));
        }
        if inner.q.len() >= self.capacity {
            return Err((val, AddError::Full));
        }
        inner.q.push_back(val);
        inner.max_depth = inner.max_depth.max(inner.q.len());
        self.readable.notify_one();
        Ok(())
    }

    /// Blocking pop. `None` means closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(v) = inner.q.pop_front() {
                self.writable.notify_one();
                return Some(v);
            }
            if inner.closed {
                return None;
            }
            inner = self.readable.wait(inner).unwrap();
        }
    }

    /// Close the queue: wake all waiters, refuse new elements.
    /// Already queued elements can still be taken.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// True once [`Queue::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Current number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().q.len()
    }

    /// True if no elements are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// High watermark of the queue depth, and reset it.
    ///
    /// The stats reporter reads this once per second for the `q_max`
    /// field.
    pub fn take_max_depth(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let d = inner.max_depth;
        inner.max_depth = inner.q.len();
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let q = Queue::new(8);
        for i in 0..5 {
            q.put(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.take(), Some(i));
        }
    }

    #[test]
    fn add_reports_full() {
        let q = Queue::new(2);
        assert!(q.add(1).is_ok());
        assert!(q.add(2).is_ok());
        match q.add(3) {
            Err((v, AddError::Full)) => assert_eq!(v, 3),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(q.take(), Some(1));
        assert!(q.add(3).is_ok());
    }

    #[test]
    fn close_drains_then_none() {
        let q = Queue::new(4);
        q.put("a").unwrap();
        q.put("b").unwrap();
        q.close();
        assert_eq!(q.put("c"), Err("c"));
        assert_eq!(q.add("c"), Err(("c", AddError::Closed)));
        assert_eq!(q.take(), Some("a"));
        assert_eq!(q.take(), Some("b"));
        assert_eq!(q.take(), None);
        assert_eq!(q.take(), None);
    }

    #[test]
    fn close_wakes_blocked_taker() {
        let q = Arc::new(Queue::<u32>::new(1));
        let q2 = q.clone();
        let th = std::thread::spawn(move || q2.take());
        std::thread::sleep(std::time::Duration::from_millis(50));
        q.close();
        assert_eq!(th.join().unwrap(), None);
    }

    #[test]
    fn put_blocks_until_room() {
        let q = Arc::new(Queue::new(1));
        q.put(1u32).unwrap();
        let q2 = q.clone();
        let th = std::thread::spawn(move || q2.put(2).is_ok());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(q.take(), Some(1));
        assert!(th.join().unwrap());
        assert_eq!(q.take(), Some(2));
    }

    #[test]
    fn depth_watermark() {
        let q = Queue::new(8);
        q.put(1).unwrap();
        q.put(2).unwrap();
        q.put(3).unwrap();
        q.take();
        assert_eq!(q.take_max_depth(), 3);
        assert_eq!(q.take_max_depth(), 2);
    }
}
