//! # Coupled Run Test Suite
//!
//! End-to-end runs of the scheduler over the reference adapters, in every
//! coupling mode and on one or several ranks, plus the command line surface.

mod coupling_tests;
