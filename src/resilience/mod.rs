// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure isolation and retry primitives shared by every subsystem.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitConfig, CircuitError, CircuitRegistry, CircuitState, CircuitStats};
pub use retry::{retry_transient, BackoffPolicy, RetryOptions};
