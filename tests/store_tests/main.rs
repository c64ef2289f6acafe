//! Document store test suite
