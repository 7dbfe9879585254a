//! Contract suite entry point for the in-memory backend.
//!
//! When new contract tests are added to the suite, every invocation of
//! `ordercore_contract_tests!` picks them up without changes here.

use ordercore_testing::contract::ordercore_contract_tests;

ordercore_contract_tests! {
    suite = in_memory,
    make_store = ordercore_memory::InMemoryStore::new,
}
