//! Reader/writer lock with explicit and scoped acquisition
//!
//! Any number of readers may hold the lock at once, or exactly one writer,
//! never both. This is a thin layer over [`std::sync::RwLock`]: guards release
//! the lock when dropped, so a release can never happen without a matching
//! acquire, and scoped helpers release on every exit path, unwinding included.
//!
//! # Fairness
//!
//! No fairness is promised. The priority policy is whatever the platform
//! `std` implementation provides; on Linux the futex-based lock makes new
//! readers wait behind a queued writer, elsewhere readers may starve writers.
//!
//! # Reentrancy
//!
//! The lock is not reentrant. Acquiring it again on a thread that already
//! holds it, in any mode, may deadlock or panic.

use crate::{DataError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// Many readers or one writer around a value of type `T`
#[derive(Debug)]
pub struct ReadWriteLock<T> {
    inner: RwLock<T>,
    name: &'static str,
}

/// Shared access, released on drop or [`ReadGuard::release`]
#[derive(Debug)]
pub struct ReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

/// Exclusive access, released on drop or [`WriteGuard::release`]
#[derive(Debug)]
pub struct WriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> ReadWriteLock<T> {
    pub fn new(value: T) -> Self {
        Self::named("rwlock", value)
    }

    /// Create a lock whose name shows up in poisoning errors and logs
    pub fn named(name: &'static str, value: T) -> Self {
        Self {
            inner: RwLock::new(value),
            name,
        }
    }

    /// Block until shared access is available
    pub fn acquire_read(&self) -> Result<ReadGuard<'_, T>> {
        let guard = self.inner.read().map_err(|_| self.poisoned())?;
        Ok(ReadGuard { guard })
    }

    /// Block until exclusive access is available
    pub fn acquire_write(&self) -> Result<WriteGuard<'_, T>> {
        let guard = self.inner.write().map_err(|_| self.poisoned())?;
        Ok(WriteGuard { guard })
    }

    /// Shared access if no writer holds the lock right now
    pub fn try_acquire_read(&self) -> Result<Option<ReadGuard<'_, T>>> {
        match self.inner.try_read() {
            Ok(guard) => Ok(Some(ReadGuard { guard })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(self.poisoned()),
        }
    }

    /// Exclusive access if nobody holds the lock right now
    pub fn try_acquire_write(&self) -> Result<Option<WriteGuard<'_, T>>> {
        match self.inner.try_write() {
            Ok(guard) => Ok(Some(WriteGuard { guard })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(self.poisoned()),
        }
    }

    /// Run `f` with shared access
    pub fn scoped_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = self.acquire_read()?;
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access
    pub fn scoped_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.acquire_write()?;
        Ok(f(&mut guard))
    }

    pub fn into_inner(self) -> Result<T> {
        let name = self.name;
        self.inner
            .into_inner()
            .map_err(|_| DataError::LockPoisoned(name))
    }

    fn poisoned(&self) -> DataError {
        tracing::error!(lock = self.name, "lock poisoned by a panicking holder");
        DataError::LockPoisoned(self.name)
    }
}

impl<T> ReadGuard<'_, T> {
    /// Give up shared access
    pub fn release(self) {
        drop(self);
    }
}

impl<T> WriteGuard<'_, T> {
    /// Give up exclusive access
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
