//! Mutex recovery so a panic in one holder does not wedge a sandbox instance's index table.

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(context, "mutex poisoned; recovering");
        crate::log_debug(&format!("mutex poisoned in {context}; recovering"));
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::lock_or_recover;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[test]
    fn lock_or_recover_hands_out_plain_guard() {
        let lock = Mutex::new(BTreeSet::from([0_u32]));
        lock_or_recover(&lock, "plain").insert(1);

        let indices = lock.lock().expect("lock should not be poisoned");
        assert_eq!(indices.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn lock_or_recover_keeps_state_written_before_poisoning() {
        let lock = Mutex::new(BTreeSet::from([3_u32]));
        let _ = std::panic::catch_unwind(|| {
            let mut guard = lock.lock().expect("first lock");
            guard.insert(4);
            panic!("poison the index table");
        });
        assert!(lock.is_poisoned());

        let mut guard = lock_or_recover(&lock, "poisoned-table");
        guard.remove(&3);
        assert_eq!(guard.iter().copied().collect::<Vec<_>>(), vec![4]);
    }
}
