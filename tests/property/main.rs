//! Property-based suites for the matcher, counters, and event sanitizer.

mod counter_props;
mod matcher_props;
mod sanitize_props;
