//! Unit tests module

pub mod assertion_test;
pub mod codec_test;
pub mod policy_test;
