use std::fmt;

use rayfold_error::{DbError, ErrorKind, Result};
use tracing::warn;

/// Something holding resources that must be given back exactly once.
pub trait Release {
    /// Release held resources.
    ///
    /// Must be idempotent.
    fn release(&mut self) -> Result<()>;
}

/// Pull-based cursor over the elements of a single partition.
///
/// Each element is accompanied by an ordering key produced upstream. The key
/// is carried along but never interpreted by aggregation.
pub trait PartitionEnumerator: Release + Send + 'static {
    type Item: Send + 'static;
    type Key;

    /// Produce the next element and its key.
    ///
    /// Returns `Ok(None)` once the partition is exhausted, and keeps doing so
    /// on every call after that. An error indicates a fault in the source.
    fn advance(&mut self) -> Result<Option<(Self::Item, Self::Key)>>;
}

/// Owns a releasable resource and guarantees it's released exactly once.
///
/// Explicitly calling `release` lets the caller observe failures. If the guard
/// is dropped without that (early return, unwinding), the resource is released
/// on drop and failures are logged.
pub struct ReleaseGuard<R: Release> {
    inner: R,
    released: bool,
}

impl<R: Release> ReleaseGuard<R> {
    pub fn new(inner: R) -> Self {
        ReleaseGuard {
            inner,
            released: false,
        }
    }

    pub fn get(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the inner resource.
    ///
    /// Only the first call reaches the resource, later calls return `Ok(())`.
    /// Errors are always reported with the `Release` kind.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        self.inner.release().map_err(|err| {
            if err.kind() == ErrorKind::Release {
                err
            } else {
                DbError::with_source("Failed to release resource", Box::new(err))
                    .with_error_kind(ErrorKind::Release)
            }
        })
    }
}

impl<R: Release> Drop for ReleaseGuard<R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            warn!(%e, "release on drop failed");
        }
    }
}

impl<R: Release + fmt::Debug> fmt::Debug for ReleaseGuard<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("inner", &self.inner)
            .field("released", &self.released)
            .finish()
    }
}

/// Partition over an owned vector.
///
/// The key for each element is its position within the partition.
#[derive(Debug)]
pub struct VecPartition<T> {
    items: std::vec::IntoIter<T>,
    position: usize,
}

impl<T> VecPartition<T> {
    pub fn new(items: Vec<T>) -> Self {
        VecPartition {
            items: items.into_iter(),
            position: 0,
        }
    }

    /// Number of elements not yet produced.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl<T> Release for VecPartition<T> {
    fn release(&mut self) -> Result<()> {
        // Drop remaining elements. Subsequent advances report exhaustion.
        self.items = Vec::new().into_iter();
        Ok(())
    }
}

impl<T> PartitionEnumerator for VecPartition<T>
where
    T: Send + 'static,
{
    type Item = T;
    type Key = usize;

    fn advance(&mut self) -> Result<Option<(T, usize)>> {
        match self.items.next() {
            Some(item) => {
                let key = self.position;
                self.position += 1;
                Ok(Some((item, key)))
            }
            None => Ok(None),
        }
    }
}

/// Partition over an iterator producing `(element, key)` pairs.
pub struct IterPartition<I> {
    iter: Option<I>,
}

impl<I> IterPartition<I> {
    pub fn new(iter: I) -> Self {
        IterPartition { iter: Some(iter) }
    }
}

impl<I> fmt::Debug for IterPartition<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterPartition")
            .field("released", &self.iter.is_none())
            .finish_non_exhaustive()
    }
}

impl<I> Release for IterPartition<I> {
    fn release(&mut self) -> Result<()> {
        self.iter = None;
        Ok(())
    }
}

impl<I, T, K> PartitionEnumerator for IterPartition<I>
where
    I: Iterator<Item = (T, K)> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;
    type Key = K;

    fn advance(&mut self) -> Result<Option<(T, K)>> {
        Ok(self.iter.as_mut().and_then(|iter| iter.next()))
    }
}

/// Split `items` into `count` contiguous partitions, preserving source order.
///
/// Partition sizes differ by at most one, with earlier partitions receiving
/// the extra elements. Partitions may be empty if there are fewer items than
/// partitions.
pub fn split_into_partitions<T>(items: Vec<T>, count: usize) -> Result<Vec<VecPartition<T>>> {
    if count == 0 {
        return Err(DbError::new("Cannot split input into zero partitions"));
    }

    let base = items.len() / count;
    let extra = items.len() % count;

    let mut partitions = Vec::with_capacity(count);
    let mut items = items.into_iter();

    for idx in 0..count {
        let len = if idx < extra { base + 1 } else { base };
        partitions.push(VecPartition::new(items.by_ref().take(len).collect()));
    }

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestPartition;

    fn drain<E: PartitionEnumerator>(source: &mut E) -> Vec<(E::Item, E::Key)> {
        let mut out = Vec::new();
        while let Some(entry) = source.advance().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn vec_partition_keys_are_positions() {
        let mut source = VecPartition::new(vec!['a', 'b', 'c']);
        assert_eq!(vec![('a', 0), ('b', 1), ('c', 2)], drain(&mut source));

        // Stays exhausted.
        assert!(source.advance().unwrap().is_none());
        assert!(source.advance().unwrap().is_none());
    }

    #[test]
    fn vec_partition_release_is_idempotent() {
        let mut source = VecPartition::new(vec![1, 2, 3]);
        source.advance().unwrap();
        source.release().unwrap();
        source.release().unwrap();
        assert!(source.advance().unwrap().is_none());
    }

    #[test]
    fn iter_partition_passes_keys_through() {
        let mut source = IterPartition::new(vec![(1.5, "x"), (2.5, "y")].into_iter());
        assert_eq!(vec![(1.5, "x"), (2.5, "y")], drain(&mut source));
    }

    #[test]
    fn split_even_and_uneven() {
        let parts = split_into_partitions((0..7).collect(), 3).unwrap();
        let sizes: Vec<_> = parts.iter().map(|p| p.remaining()).collect();
        assert_eq!(vec![3, 2, 2], sizes);

        let mut flattened = Vec::new();
        for mut part in parts {
            flattened.extend(drain(&mut part).into_iter().map(|(v, _)| v));
        }
        assert_eq!((0..7).collect::<Vec<_>>(), flattened);
    }

    #[test]
    fn split_more_partitions_than_items() {
        let parts = split_into_partitions(vec![1, 2], 4).unwrap();
        let sizes: Vec<_> = parts.iter().map(|p| p.remaining()).collect();
        assert_eq!(vec![1, 1, 0, 0], sizes);
    }

    #[test]
    fn split_zero_partitions_errors() {
        split_into_partitions(vec![1], 0).unwrap_err();
    }

    #[test]
    fn guard_releases_on_drop() {
        let source = TestPartition::new(vec![1.0]);
        let probe = source.probe();
        {
            let _guard = ReleaseGuard::new(source);
        }
        assert_eq!(1, probe.releases());
    }

    #[test]
    fn guard_releases_once() {
        let source = TestPartition::new(vec![1.0]);
        let probe = source.probe();

        let mut guard = ReleaseGuard::new(source);
        guard.release().unwrap();
        guard.release().unwrap();
        assert!(guard.is_released());
        std::mem::drop(guard);

        assert_eq!(1, probe.releases());
    }

    #[test]
    fn guard_release_error_has_release_kind() {
        let source = TestPartition::new(vec![1.0]).with_failing_release();
        let probe = source.probe();

        let mut guard = ReleaseGuard::new(source);
        let err = guard.release().unwrap_err();
        assert_eq!(ErrorKind::Release, err.kind());

        // Already attempted, drop doesn't try again.
        std::mem::drop(guard);
        assert_eq!(1, probe.releases());
    }
}
