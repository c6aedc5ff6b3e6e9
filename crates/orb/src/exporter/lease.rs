//! Ping sets
//!
//! A client groups the OIDs it holds proxies for, per remote exporter,
//! into a named set; one periodic liveness message then renews the lease
//! of every member. Sets are scoped to the transport session that created
//! them — a reconnecting client starts over with a fresh set.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::{Oid, OrbError, Result, SetId};

/// One named ping set.
pub struct PingSet {
    pub set_id: SetId,
    /// Transport session that owns the set.
    pub session: u64,
    pub oids: HashSet<Oid>,
    /// Highest delta sequence applied so far.
    pub sequence: u16,
    /// Time since the last ping named this set.
    pub silence: Duration,
}

impl PingSet {
    fn new(set_id: SetId, session: u64) -> Self {
        Self {
            set_id,
            session,
            oids: HashSet::new(),
            sequence: 0,
            silence: Duration::ZERO,
        }
    }
}

/// Server-side registry of ping sets.
pub struct PingSetRegistry {
    sets: Mutex<HashMap<SetId, PingSet>>,
    next_set: AtomicU64,
    /// Sets silent for longer than this are discarded.
    set_timeout: Duration,
}

impl PingSetRegistry {
    pub fn new(set_timeout: Duration) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            next_set: AtomicU64::new(1),
            set_timeout,
        }
    }

    /// Apply a delta ping: create the set when `set_id` is the reserved
    /// zero value, add and remove members, and report every OID whose
    /// lease the caller should renew.
    ///
    /// Stale sequence numbers renew the lease but apply no modifications.
    pub fn complex_ping(
        &self,
        session: u64,
        set_id: SetId,
        sequence: u16,
        add: &[Oid],
        del: &[Oid],
    ) -> Result<(SetId, Vec<Oid>)> {
        let mut sets = self.sets.lock().unwrap();

        let actual_id = if set_id.is_none() {
            let id = SetId::new(self.next_set.fetch_add(1, Ordering::Relaxed));
            sets.insert(id, PingSet::new(id, session));
            id
        } else {
            set_id
        };

        let set = sets.get_mut(&actual_id).ok_or(OrbError::SetNotFound(actual_id))?;
        if set.session != session {
            // A set never crosses transport sessions.
            return Err(OrbError::SetNotFound(actual_id));
        }

        set.silence = Duration::ZERO;
        if set.sequence == 0 || sequence > set.sequence {
            set.sequence = sequence;
            for oid in add {
                set.oids.insert(*oid);
            }
            for oid in del {
                set.oids.remove(oid);
            }
        }

        Ok((actual_id, set.oids.iter().copied().collect()))
    }

    /// Renew a set without modifying it; reports the members to renew.
    pub fn simple_ping(&self, session: u64, set_id: SetId) -> Result<Vec<Oid>> {
        let mut sets = self.sets.lock().unwrap();
        let set = sets.get_mut(&set_id).ok_or(OrbError::SetNotFound(set_id))?;
        if set.session != session {
            return Err(OrbError::SetNotFound(set_id));
        }
        set.silence = Duration::ZERO;
        Ok(set.oids.iter().copied().collect())
    }

    /// Advance silence counters; sets past the timeout are dropped. The
    /// member objects are not touched here — their own lease countdowns
    /// expire independently.
    pub fn tick(&self, elapsed: Duration) -> Vec<SetId> {
        let mut sets = self.sets.lock().unwrap();
        let mut stale = Vec::new();
        for set in sets.values_mut() {
            set.silence += elapsed;
            if set.silence >= self.set_timeout {
                stale.push(set.set_id);
            }
        }
        for id in &stale {
            sets.remove(id);
        }
        stale
    }

    /// Drop every set owned by a closing transport session.
    pub fn drop_session(&self, session: u64) -> usize {
        let mut sets = self.sets.lock().unwrap();
        let doomed: Vec<SetId> = sets
            .values()
            .filter(|s| s.session == session)
            .map(|s| s.set_id)
            .collect();
        for id in &doomed {
            sets.remove(id);
        }
        doomed.len()
    }

    pub fn contains(&self, set_id: SetId) -> bool {
        self.sets.lock().unwrap().contains_key(&set_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PingSetRegistry {
        PingSetRegistry::new(Duration::from_secs(30))
    }

    #[test]
    fn test_zero_set_id_allocates() {
        let reg = registry();
        let (id, members) = reg
            .complex_ping(1, SetId::NONE, 1, &[Oid::new(5)], &[])
            .unwrap();
        assert!(!id.is_none());
        assert_eq!(members, vec![Oid::new(5)]);
    }

    #[test]
    fn test_delta_add_and_remove() {
        let reg = registry();
        let (id, _) = reg
            .complex_ping(1, SetId::NONE, 1, &[Oid::new(1), Oid::new(2)], &[])
            .unwrap();
        let (_, members) = reg
            .complex_ping(1, id, 2, &[Oid::new(3)], &[Oid::new(1)])
            .unwrap();
        let mut members = members;
        members.sort();
        assert_eq!(members, vec![Oid::new(2), Oid::new(3)]);
    }

    #[test]
    fn test_stale_sequence_renews_without_mutating() {
        let reg = registry();
        let (id, _) = reg
            .complex_ping(1, SetId::NONE, 5, &[Oid::new(1)], &[])
            .unwrap();
        let (_, members) = reg
            .complex_ping(1, id, 4, &[Oid::new(9)], &[])
            .unwrap();
        assert_eq!(members, vec![Oid::new(1)]);
    }

    #[test]
    fn test_set_is_session_scoped() {
        let reg = registry();
        let (id, _) = reg
            .complex_ping(7, SetId::NONE, 1, &[Oid::new(1)], &[])
            .unwrap();
        assert!(matches!(
            reg.simple_ping(8, id),
            Err(OrbError::SetNotFound(_))
        ));
        assert!(reg.simple_ping(7, id).is_ok());
    }

    #[test]
    fn test_unknown_set_fails_fast() {
        let reg = registry();
        assert!(matches!(
            reg.simple_ping(1, SetId::new(999)),
            Err(OrbError::SetNotFound(_))
        ));
    }

    #[test]
    fn test_silent_sets_are_dropped() {
        let reg = registry();
        let (id, _) = reg
            .complex_ping(1, SetId::NONE, 1, &[Oid::new(1)], &[])
            .unwrap();
        reg.tick(Duration::from_secs(29));
        assert!(reg.contains(id));
        reg.tick(Duration::from_secs(1));
        assert!(!reg.contains(id));
    }

    #[test]
    fn test_drop_session_sweeps_its_sets() {
        let reg = registry();
        let (a, _) = reg.complex_ping(1, SetId::NONE, 1, &[], &[]).unwrap();
        let (b, _) = reg.complex_ping(2, SetId::NONE, 1, &[], &[]).unwrap();
        assert_eq!(reg.drop_session(1), 1);
        assert!(!reg.contains(a));
        assert!(reg.contains(b));
    }
}
