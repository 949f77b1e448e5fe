//! End-to-end tests for the fxgen pipeline live in `tests/`.
