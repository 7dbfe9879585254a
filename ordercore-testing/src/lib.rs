#![forbid(
    dead_code,
    invalid_value,
    overflowing_literals,
    unconditional_recursion,
    unreachable_pub,
    unused_allocation,
    unsafe_code
)]
#![deny(
    bad_style,
    deprecated,
    meta_variable_misuse,
    non_ascii_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_code,
    unused_assignments,
    unused_attributes,
    unused_extern_crates,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_parens,
    unused_qualifications,
    unused_results,
    unused_variables
)]

//! Shared verification for ordercore storage backends.
//!
//! - [`backend::TestBackend`] seeds catalog and address rows and inspects
//!   committed state
//! - [`contract`] holds the behavioral suite every backend must pass, wired
//!   up per backend with [`ordercore_contract_tests!`]
//! - [`chaos::ChaosStore`] injects storage failures to prove rollback and retry

pub mod backend;
pub mod chaos;
pub mod contract;

pub use backend::TestBackend;
pub use chaos::*;
