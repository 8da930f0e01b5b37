//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one step of a request. Keeping them separate
//! lets each be tested alone and lets the orchestrator swap implementations
//! (a fake converter, a stub pipeline, an in-memory object store) at the
//! trait seams.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ runner ──────────────────────────▶ rehost
//! (bytes)   (office→PDF)  classify→analyze→parse→emit        (S3 URLs)
//!                         └ native: layout, encode, ocr, postprocess
//! ```
//!
//! 1. [`input`]     : decode inline base64 or download the URL
//! 2. [`workspace`] : per-request temporary directory, removed on drop
//! 3. [`normalize`] : allow-list check; office documents through `soffice`
//! 4. [`runner`]    : drive a [`runner::DocumentPipeline`] on a blocking
//!    thread with a timeout and a cancel flag
//! 5. [`native`]    : the built-in `lopdf` pipeline, using [`layout`],
//!    [`encode`], [`ocr`] and [`postprocess`]
//! 6. [`rehost`]    : upload extracted images and rewrite references

pub mod encode;
pub mod input;
pub mod layout;
pub mod native;
pub mod normalize;
pub mod ocr;
pub mod postprocess;
pub mod rehost;
pub mod runner;
pub mod workspace;
