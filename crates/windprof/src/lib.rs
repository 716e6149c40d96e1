//! Operational tooling around `windprof-core`: filesystem persistence for
//! finished datasets, reusable from whatever wiring loads the raw data.

pub mod sink;
