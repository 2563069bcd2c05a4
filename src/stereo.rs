// SPDX-License-Identifier: GPL-3.0-only

//! Stereo-pair frame rendezvous.
//!
//! A master pipeline and its slave share one [`StereoRendezvous`]. The slave
//! deposits its current frame and waits; the master pairs it against its own
//! current frame by timestamp, discarding whichever side is stale, then
//! signals the slave to continue. At most one unpaired frame can exist on
//! either side at a time.

use std::sync::{Arc, Condvar, Mutex};

use crate::exposure::ExposureState;
use crate::frame::FrameData;

/// One side's pending contribution to the rendezvous.
#[derive(Clone)]
pub struct SlaveDeposit {
    pub timestamp_ns: u64,
    pub y: FrameData,
    pub uv: Option<FrameData>,
}

enum Slot {
    Empty,
    Pending(SlaveDeposit),
    /// The master consumed the deposit; the slave is released on its next wake.
    Consumed,
}

struct Inner {
    slot: Slot,
    stopped: bool,
}

/// Outcome of the master's attempt to pair with the current slave deposit.
pub enum PairOutcome {
    /// Paired; slave's deposit is returned alongside the skew in ns.
    Paired { slave: SlaveDeposit, skew_ns: i64 },
    /// The slave's deposit was newer than acceptable; it was kept in the
    /// slot for a future pairing and the master frame should be discarded.
    SlaveTooNew,
    /// Rendezvous is stopping; no pairing will occur.
    Stopped,
}

/// Shared rendezvous point for exactly one master/slave pair.
pub struct StereoRendezvous {
    inner: Mutex<Inner>,
    master_wait: Condvar,
    slave_wait: Condvar,
    max_skew_ns: u64,
    /// The slave pipeline's [`ExposureState`], bound once the slave
    /// pipeline is constructed. The master writes into this directly (an
    /// atomic one-way channel, never a reach-in through the slave's mutex)
    /// when running non-independent AE; see §4.5/§9.
    slave_exposure: Mutex<Option<Arc<ExposureState>>>,
}

impl StereoRendezvous {
    pub fn new(max_skew_ns: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Empty,
                stopped: false,
            }),
            master_wait: Condvar::new(),
            slave_wait: Condvar::new(),
            max_skew_ns,
            slave_exposure: Mutex::new(None),
        }
    }

    /// Bind the slave pipeline's exposure state so the master can mirror
    /// AE updates into it. Called once, by the slave pipeline, at
    /// construction time.
    pub fn bind_slave_exposure(&self, exposure: Arc<ExposureState>) {
        *self.slave_exposure.lock().unwrap() = Some(exposure);
    }

    /// Mirror a master-side AE update into the slave's exposure state, if
    /// bound. A no-op before the slave pipeline has registered itself.
    pub fn mirror_to_slave(&self, exposure_ns: u64, gain: f32) {
        if let Some(exposure) = self.slave_exposure.lock().unwrap().as_ref() {
            exposure.set(exposure_ns, gain);
        }
    }

    /// Slave side: deposit the current frame and block until the master has
    /// consumed it (or the rendezvous is stopping).
    pub fn slave_deposit_and_wait(&self, deposit: SlaveDeposit) {
        let mut inner = self.inner.lock().unwrap();
        inner.slot = Slot::Pending(deposit);
        self.master_wait.notify_one();

        inner = self
            .slave_wait
            .wait_while(inner, |inner| matches!(inner.slot, Slot::Pending(_)) && !inner.stopped)
            .unwrap();

        if matches!(inner.slot, Slot::Consumed) {
            inner.slot = Slot::Empty;
        }
    }

    /// Master side: attempt to pair `master_timestamp_ns` against whatever
    /// the slave currently has deposited, blocking until a deposit arrives.
    pub fn master_pair(&self, master_timestamp_ns: u64) -> PairOutcome {
        let mut inner = self.inner.lock().unwrap();

        inner = self
            .master_wait
            .wait_while(inner, |inner| matches!(inner.slot, Slot::Empty) && !inner.stopped)
            .unwrap();

        if inner.stopped {
            return PairOutcome::Stopped;
        }

        let deposit = match std::mem::replace(&mut inner.slot, Slot::Empty) {
            Slot::Pending(d) => d,
            _ => return PairOutcome::Stopped,
        };

        let skew_ns = master_timestamp_ns as i64 - deposit.timestamp_ns as i64;

        if skew_ns > self.max_skew_ns as i64 {
            // master is too new; discard slave's frame, release it, and
            // tell the caller to keep waiting for a fresher slave deposit.
            inner.slot = Slot::Consumed;
            self.slave_wait.notify_one();
            drop(inner);
            return self.master_pair(master_timestamp_ns);
        }

        if skew_ns < -(self.max_skew_ns as i64) {
            // slave is too new; put it back and tell the master to discard
            // its own frame instead.
            inner.slot = Slot::Pending(deposit);
            return PairOutcome::SlaveTooNew;
        }

        inner.slot = Slot::Consumed;
        self.slave_wait.notify_one();
        PairOutcome::Paired { slave: deposit, skew_ns }
    }

    /// Wake every blocked thread and mark the rendezvous stopped, so no
    /// thread remains parked past shutdown.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        drop(inner);
        self.master_wait.notify_all();
        self.slave_wait.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn deposit(ts: u64) -> SlaveDeposit {
        SlaveDeposit {
            timestamp_ns: ts,
            y: FrameData::from(vec![1, 2, 3]),
            uv: None,
        }
    }

    #[test]
    fn pairs_within_skew() {
        let rendezvous = Arc::new(StereoRendezvous::new(1_000_000));
        let r2 = rendezvous.clone();
        let slave_thread = thread::spawn(move || {
            r2.slave_deposit_and_wait(deposit(1_000_000));
        });

        let outcome = rendezvous.master_pair(1_500_000);
        match outcome {
            PairOutcome::Paired { skew_ns, .. } => assert_eq!(skew_ns, 500_000),
            _ => panic!("expected a pairing"),
        }
        slave_thread.join().unwrap();
    }

    #[test]
    fn stop_releases_blocked_master() {
        let rendezvous = Arc::new(StereoRendezvous::new(1_000_000));
        let r2 = rendezvous.clone();
        let handle = thread::spawn(move || r2.master_pair(0));
        // give the master a moment to block, then stop.
        thread::sleep(std::time::Duration::from_millis(20));
        rendezvous.stop();
        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, PairOutcome::Stopped));
    }

    #[test]
    fn mirror_to_slave_updates_bound_exposure_state() {
        let rendezvous = StereoRendezvous::new(1_000_000);
        let slave_exposure = Arc::new(ExposureState::new(1_000_000, 1.0));
        rendezvous.bind_slave_exposure(slave_exposure.clone());

        rendezvous.mirror_to_slave(4_000_000, 3.0);

        assert_eq!(slave_exposure.exposure_ns(), 4_000_000);
        assert_eq!(slave_exposure.gain(), 3.0);
    }

    #[test]
    fn mirror_to_slave_is_noop_before_binding() {
        let rendezvous = StereoRendezvous::new(1_000_000);
        // must not panic even though no slave has registered yet.
        rendezvous.mirror_to_slave(4_000_000, 3.0);
    }

    #[test]
    fn slave_too_new_keeps_deposit_for_next_pairing() {
        let rendezvous = Arc::new(StereoRendezvous::new(1_000));
        let r2 = rendezvous.clone();
        let slave_thread = thread::spawn(move || {
            r2.slave_deposit_and_wait(deposit(10_000_000));
        });
        thread::sleep(std::time::Duration::from_millis(20));

        let outcome = rendezvous.master_pair(0);
        assert!(matches!(outcome, PairOutcome::SlaveTooNew));

        // a second, fresher master timestamp should now pair.
        let outcome2 = rendezvous.master_pair(10_000_500);
        assert!(matches!(outcome2, PairOutcome::Paired { .. }));
        slave_thread.join().unwrap();
    }
}
