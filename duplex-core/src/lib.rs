pub mod common_tests;
pub mod data_structures;
pub mod guard;
pub mod preemptive_synchronization;

pub use data_structures::{ContentionPolicy, DequeOptions, LockFreeDeque, NodeRef};

/*

cargo llvm-cov --html

sudo CARGO_PROFILE_RELEASE_DEBUG=true cargo flamegraph --bench deque_benchmark --root --

cargo valgrind test

RUST_LOG=duplex_core=trace cargo test --test deque_stress_tests -- --nocapture

*/
