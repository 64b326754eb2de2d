//! Circuit breaking for failing dependencies.

mod breaker;

pub use breaker::{
    CircuitBreaker, CircuitBreakerOptions, CircuitSnapshot, CircuitState, StateObserver,
};
