//! Index test suite
