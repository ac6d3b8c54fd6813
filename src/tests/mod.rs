//! Cross-module tests that run the whole pipeline.
