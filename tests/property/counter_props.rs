//! Counter invariants hold after repair, for arbitrary drifted inputs.

use proptest::prelude::*;

use bulkshare_rs::counters::ProgressCounters;

proptest! {
    /// `validate` always lands counters inside the invariants, whatever
    /// state a resumed snapshot left them in.
    #[test]
    fn validate_restores_invariants(
        total in 0u64..1000,
        processed in 0u64..2000,
        successful in 0u64..2000,
        failed in 0u64..2000,
        errors in 0u64..2000,
        active in 0u64..100,
        workers in 1u64..64,
    ) {
        let mut c = ProgressCounters {
            total,
            processed,
            successful,
            failed,
            errors,
            active_workers: active,
        };
        c.validate(workers);

        prop_assert!(c.processed <= c.total);
        prop_assert!(c.successful + c.failed <= c.processed);
        prop_assert!(c.active_workers <= workers);
    }

    /// Repair is idempotent: a second validation changes nothing.
    #[test]
    fn validate_is_idempotent(
        total in 0u64..1000,
        processed in 0u64..2000,
        successful in 0u64..2000,
        failed in 0u64..2000,
        active in 0u64..100,
        workers in 1u64..64,
    ) {
        let mut c = ProgressCounters {
            total,
            processed,
            successful,
            failed,
            errors: 0,
            active_workers: active,
        };
        c.validate(workers);
        let repaired = c;
        prop_assert!(!c.validate(workers), "second validate repaired again");
        prop_assert_eq!(c, repaired);
    }

    /// Counters within their invariants are never altered.
    #[test]
    fn valid_counters_untouched(
        total in 0u64..1000,
        workers in 1u64..64,
    ) {
        // Derive an in-range state from total.
        let processed = total / 2;
        let successful = processed / 3;
        let failed = processed / 3;
        let mut c = ProgressCounters {
            total,
            processed,
            successful,
            failed,
            errors: processed - successful - failed,
            active_workers: workers.min(processed),
        };
        let before = c;
        prop_assert!(!c.validate(workers));
        prop_assert_eq!(c, before);
    }

    /// Normal engine mutation sequences (enqueue-then-resolve) keep the
    /// strong equality `successful + failed + errors == processed`.
    #[test]
    fn outcome_sequences_preserve_equality(outcomes in proptest::collection::vec(0u8..3, 0..100)) {
        let mut c = ProgressCounters {
            total: outcomes.len() as u64,
            ..ProgressCounters::default()
        };
        for kind in &outcomes {
            c.processed += 1;
            match kind {
                0 => c.successful += 1,
                1 => c.failed += 1,
                _ => c.errors += 1,
            }
            c.validate(16);
        }
        prop_assert_eq!(c.successful + c.failed + c.errors, c.processed);
        prop_assert_eq!(c.processed, c.total);
    }
}
