// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Small shared utilities: object identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global monotonically-increasing object ID counter.
static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a globally unique, monotonically increasing identifier.
///
/// Used for turn ids and jitter-buffer group ids. Each call returns a value
/// one greater than the previous call, starting from 0.
pub fn obj_id() -> u64 {
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_id_monotonic() {
        let a = obj_id();
        let b = obj_id();
        let c = obj_id();
        assert!(a < b && b < c);
    }
}
