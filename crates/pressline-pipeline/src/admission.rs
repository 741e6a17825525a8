//! Per-transformation concurrency quotas.
//!
//! # Design
//! - One mutex guards every counter so admit and release decisions are serialised.
//! - Waiters park on a `Notify` outside the lock; every release wakes them to retry.
//! - Permits are RAII: dropping one returns its slot.
//!
//! A pipeline admits its stages one at a time and keeps earlier slots while
//! waiting for later ones. Two pipelines that each hold the slot the other
//! needs can therefore wait on each other until one of their running stages
//! exits; with stages that block on a full pipe this may never happen. Sizing
//! maximums above the longest expected pipeline avoids the pattern.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pressline_config::CapacityConfig;
use pressline_protocol::Transformation;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{AdmissionError, AdmissionResult};

/// Configured maximum and live usage of one transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityEntry {
    /// Most stages of this kind that may run at once.
    pub maximum: usize,
    /// Stages of this kind currently admitted.
    pub in_use: usize,
}

/// Capacity entry tagged with its transformation, as reported by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    /// Transformation the entry belongs to.
    pub transformation: Transformation,
    /// Stages currently admitted.
    pub in_use: usize,
    /// Configured maximum.
    pub maximum: usize,
}

#[derive(Debug)]
struct State {
    entries: HashMap<Transformation, CapacityEntry>,
    closed: bool,
}

/// Shared admission state for every in-flight pipeline.
#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<State>,
    released: Notify,
}

impl AdmissionController {
    /// Controller with every transformation at maximum 0.
    #[must_use]
    pub fn new() -> Self {
        let entries = Transformation::ALL
            .into_iter()
            .map(|transformation| (transformation, CapacityEntry::default()))
            .collect();
        Self {
            state: Mutex::new(State {
                entries,
                closed: false,
            }),
            released: Notify::new(),
        }
    }

    /// Controller configured from a parsed capacity file.
    #[must_use]
    pub fn from_config(config: &CapacityConfig) -> Self {
        let controller = Self::new();
        controller.configure(config.iter());
        controller
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set maximums; later entries for the same transformation overwrite earlier ones.
    pub fn configure<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (Transformation, usize)>,
    {
        let mut state = self.lock();
        for (transformation, maximum) in entries {
            state.entries.entry(transformation).or_default().maximum = maximum;
            debug!(%transformation, maximum, "capacity configured");
        }
        drop(state);
        self.released.notify_waiters();
    }

    /// Configured maximum for `transformation`.
    #[must_use]
    pub fn maximum(&self, transformation: Transformation) -> usize {
        self.lock()
            .entries
            .get(&transformation)
            .map_or(0, |entry| entry.maximum)
    }

    /// Stages of `transformation` currently admitted.
    #[must_use]
    pub fn in_use(&self, transformation: Transformation) -> usize {
        self.lock()
            .entries
            .get(&transformation)
            .map_or(0, |entry| entry.in_use)
    }

    /// Take a slot if one is free. Never blocks.
    pub fn try_admit(&self, transformation: Transformation) -> bool {
        let mut state = self.lock();
        let entry = state.entries.entry(transformation).or_default();
        if entry.in_use < entry.maximum {
            entry.in_use += 1;
            true
        } else {
            false
        }
    }

    /// Return a slot. Saturates at zero.
    pub fn release(&self, transformation: Transformation) {
        let mut state = self.lock();
        let entry = state.entries.entry(transformation).or_default();
        if entry.in_use == 0 {
            warn!(%transformation, "release without matching admission");
        } else {
            entry.in_use -= 1;
        }
        drop(state);
        self.released.notify_waiters();
    }

    /// Wait until a slot for `transformation` is free and take it.
    ///
    /// No lock is held while waiting. Once [`close`](Self::close) has been
    /// called a free slot is still granted, but the call no longer waits.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Closed`] when the controller is closed and
    /// no slot is free.
    pub async fn await_admit(
        self: &Arc<Self>,
        transformation: Transformation,
    ) -> AdmissionResult<AdmissionPermit> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_admit(transformation) {
                return Ok(AdmissionPermit {
                    controller: Arc::clone(self),
                    transformation,
                });
            }
            if self.is_closed() {
                return Err(AdmissionError::Closed { transformation });
            }
            notified.await;
        }
    }

    /// Stop waiting admissions; waiters without a free slot fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.released.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Usage of every transformation, in code order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CapacitySnapshot> {
        let state = self.lock();
        let mut snapshot: Vec<CapacitySnapshot> = state
            .entries
            .iter()
            .map(|(transformation, entry)| CapacitySnapshot {
                transformation: *transformation,
                in_use: entry.in_use,
                maximum: entry.maximum,
            })
            .collect();
        drop(state);
        snapshot.sort_by_key(|entry| entry.transformation);
        snapshot
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

/// One admitted stage slot; released on drop.
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    transformation: Transformation,
}

impl AdmissionPermit {
    /// Transformation the slot belongs to.
    #[must_use]
    pub const fn transformation(&self) -> Transformation {
        self.transformation
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("transformation", &self.transformation)
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release(self.transformation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn controller(entries: &[(Transformation, usize)]) -> Arc<AdmissionController> {
        let controller = Arc::new(AdmissionController::new());
        controller.configure(entries.iter().copied());
        controller
    }

    #[test]
    fn try_admit_respects_maximum() {
        let admission = controller(&[(Transformation::Encrypt, 2)]);
        assert!(admission.try_admit(Transformation::Encrypt));
        assert!(admission.try_admit(Transformation::Encrypt));
        assert!(!admission.try_admit(Transformation::Encrypt));
        assert_eq!(admission.in_use(Transformation::Encrypt), 2);

        admission.release(Transformation::Encrypt);
        assert!(admission.try_admit(Transformation::Encrypt));
    }

    #[test]
    fn unconfigured_transformations_never_admit() {
        let admission = controller(&[]);
        assert_eq!(admission.maximum(Transformation::Decrypt), 0);
        assert!(!admission.try_admit(Transformation::Decrypt));
    }

    #[test]
    fn release_saturates_at_zero() {
        let admission = controller(&[(Transformation::Nop, 1)]);
        admission.release(Transformation::Nop);
        assert_eq!(admission.in_use(Transformation::Nop), 0);
        assert!(admission.try_admit(Transformation::Nop));
        assert!(!admission.try_admit(Transformation::Nop));
    }

    #[test]
    fn configure_overwrites_duplicates() {
        let admission = controller(&[(Transformation::Encrypt, 1), (Transformation::Encrypt, 4)]);
        assert_eq!(admission.maximum(Transformation::Encrypt), 4);
    }

    #[tokio::test]
    async fn await_admit_blocks_until_release() {
        let admission = controller(&[(Transformation::Encrypt, 1)]);
        let held = admission
            .await_admit(Transformation::Encrypt)
            .await
            .expect("first permit");

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.await_admit(Transformation::Encrypt).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(admission.in_use(Transformation::Encrypt), 1);

        drop(held);
        let second = timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter wakes after release")
            .expect("task joins")
            .expect("permit granted");
        assert_eq!(second.transformation(), Transformation::Encrypt);
        assert_eq!(admission.in_use(Transformation::Encrypt), 1);
        drop(second);
        assert_eq!(admission.in_use(Transformation::Encrypt), 0);
    }

    #[tokio::test]
    async fn other_transformations_progress_while_one_waits() {
        let admission = controller(&[(Transformation::Encrypt, 1), (Transformation::Decrypt, 1)]);
        let _held = admission
            .await_admit(Transformation::Encrypt)
            .await
            .expect("encrypt permit");
        let blocked = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.await_admit(Transformation::Encrypt).await })
        };
        let decrypt = timeout(
            Duration::from_secs(1),
            admission.await_admit(Transformation::Decrypt),
        )
        .await
        .expect("decrypt is not starved");
        assert!(decrypt.is_ok());
        blocked.abort();
    }

    #[tokio::test]
    async fn close_fails_waiters_but_grants_free_slots() {
        let admission = controller(&[(Transformation::Nop, 1), (Transformation::Encrypt, 1)]);
        let held = admission
            .await_admit(Transformation::Nop)
            .await
            .expect("nop permit");
        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.await_admit(Transformation::Nop).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        admission.close();
        let outcome = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter wakes on close")
            .expect("task joins");
        assert_eq!(
            outcome.err(),
            Some(AdmissionError::Closed {
                transformation: Transformation::Nop
            })
        );
        assert!(admission.await_admit(Transformation::Encrypt).await.is_ok());
        drop(held);
    }

    #[test]
    fn snapshot_lists_every_transformation_in_code_order() {
        let admission = controller(&[(Transformation::Decrypt, 3), (Transformation::Nop, 1)]);
        assert!(admission.try_admit(Transformation::Decrypt));
        let snapshot = admission.snapshot();
        assert_eq!(snapshot.len(), Transformation::ALL.len());
        assert_eq!(snapshot[0].transformation, Transformation::Nop);
        let decrypt = snapshot
            .iter()
            .find(|entry| entry.transformation == Transformation::Decrypt)
            .expect("decrypt listed");
        assert_eq!((decrypt.in_use, decrypt.maximum), (1, 3));
    }
}
