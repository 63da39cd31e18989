//! Partition sources with injectable behavior for tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rayfold_error::{DbError, Result};

use crate::cancel::CancellationToken;
use crate::partition::{PartitionEnumerator, Release};

/// Counters shared with a `TestPartition` that outlive it.
#[derive(Debug, Clone, Default)]
pub struct ReleaseProbe {
    releases: Arc<AtomicUsize>,
    advances: Arc<AtomicUsize>,
}

impl ReleaseProbe {
    /// Number of times release was called on the partition.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Number of times advance was called on the partition.
    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }
}

pub struct TestPartition<T> {
    items: Box<dyn Iterator<Item = T> + Send>,
    produced: usize,
    probe: ReleaseProbe,
    fail_after: Option<usize>,
    panic_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    failing_release: bool,
    delay: Option<Duration>,
    released: bool,
}

impl<T> TestPartition<T>
where
    T: Send + 'static,
{
    pub fn new(items: Vec<T>) -> Self {
        Self::from_iter_boxed(Box::new(items.into_iter()))
    }

    /// Partition that never runs out of elements.
    pub fn endless(value: T) -> Self
    where
        T: Clone,
    {
        Self::from_iter_boxed(Box::new(std::iter::repeat(value)))
    }

    fn from_iter_boxed(items: Box<dyn Iterator<Item = T> + Send>) -> Self {
        TestPartition {
            items,
            produced: 0,
            probe: ReleaseProbe::default(),
            fail_after: None,
            panic_after: None,
            cancel_after: None,
            failing_release: false,
            delay: None,
            released: false,
        }
    }

    pub fn probe(&self) -> ReleaseProbe {
        self.probe.clone()
    }

    /// Error on the advance following the `n`th element.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Panic on the advance following the `n`th element.
    pub fn panic_after(mut self, n: usize) -> Self {
        self.panic_after = Some(n);
        self
    }

    /// Trigger `token` when producing the `n`th element.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn with_failing_release(mut self) -> Self {
        self.failing_release = true;
        self
    }

    /// Sleep before producing the first element.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl<T> Release for TestPartition<T>
where
    T: Send + 'static,
{
    fn release(&mut self) -> Result<()> {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
        if !self.released {
            self.released = true;
            self.items = Box::new(std::iter::empty());
        }
        if self.failing_release {
            return Err(DbError::new("injected release failure"));
        }
        Ok(())
    }
}

impl<T> PartitionEnumerator for TestPartition<T>
where
    T: Send + 'static,
{
    type Item = T;
    type Key = usize;

    fn advance(&mut self) -> Result<Option<(T, usize)>> {
        self.probe.advances.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay.take() {
            std::thread::sleep(delay);
        }
        if self.fail_after == Some(self.produced) {
            return Err(DbError::new("injected source failure"));
        }
        if self.panic_after == Some(self.produced) {
            panic!("injected panic");
        }

        let item = match self.items.next() {
            Some(item) => item,
            None => return Ok(None),
        };
        let key = self.produced;
        self.produced += 1;

        if let Some((n, token)) = &self.cancel_after {
            if *n == self.produced {
                token.cancel();
            }
        }

        Ok(Some((item, key)))
    }
}

impl<T> fmt::Debug for TestPartition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestPartition")
            .field("produced", &self.produced)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
