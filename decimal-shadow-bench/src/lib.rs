//! Load generator and correctness checker for a decimal-arithmetic store.
//!
//! Workers hammer the store's `bn.*` commands while the harness keeps its
//! own high-precision copy of what every tracked key should hold. After a
//! termination signal the workers drain and the two sides are compared.
//!
//! - [`cli`] parses the command line; [`config`] validates it.
//! - [`resp`] frames requests and replies; [`store`] wraps a connection to
//!   the store in a [`store::Session`] and hands sessions out through a
//!   [`store::StorePool`].
//! - [`decimal`] fixes the precision, rounding, and exponent range of the
//!   shadow arithmetic.
//! - [`catalog`] lists every operation a worker can be bound to.
//! - [`shadow`] holds the mirrored registers behind a single lock.
//! - [`worker`] runs one operation in batches until cancelled.
//! - [`shutdown`] owns the cancellation signal and drains the workers.
//! - [`report`] compares store and shadow values and computes throughput.
//! - [`harness`] wires a run together from probe to report.
//!
//! Integration tests drive the harness against an in-process fake store.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod decimal;
pub mod harness;
pub mod report;
pub mod resp;
pub mod shadow;
pub mod shutdown;
pub mod store;
pub mod worker;
