//! Shared domain types for the Yarra conversational profile engine.
//!
//! Everything here is plain data plus pure logic: profile field merging,
//! account scrubbing, export checksums. Storage and orchestration live in
//! `yarra-engine`; this crate stays dependency-light so tools and services
//! can share the same vocabulary.

pub mod audit;
pub mod consent;
pub mod error;
pub mod export;
pub mod intent;
pub mod profile;
pub mod relationship;
pub mod session;
pub mod user;
