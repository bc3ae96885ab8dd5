// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared test infrastructure for the subvolume crates
//!
//! - [`FakeTree`]: ordered in-memory metadata trees implementing the search
//!   transport with kernel range and buffer semantics
//! - [`payload`]: encoders for root, backref and UUID items
//! - [`init_test_tracing`]: tracing output captured by the test harness

pub mod fake_tree;
pub mod logging;
pub mod payload;

pub use fake_tree::{FakeTree, ScriptedFailure};
pub use logging::init_test_tracing;
pub use payload::{encode_backref, encode_root_item, encode_uuid_item, extension, root_record};
