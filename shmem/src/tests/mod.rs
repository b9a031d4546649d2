use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::ShmemConfig;

mod concurrency_tests;

/// A config naming a segment no other test in this process or any other
/// process uses.
pub(crate) fn unique_config(capacity: usize) -> ShmemConfig {
    static SHMEM_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
    let name = format!(
        "linda_test_{}_{}",
        std::process::id(),
        SHMEM_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    );
    ShmemConfig::new(name, capacity)
}
