//! Necessary types, helpers, and functions to pre-process audio input to
//! prepare it for the **analysis layer**.
//!
//! This module only operates on raw data, without interacting with the outer
//! world (I/O). The main entry is [`envelope::EnvelopeExtractor`], which turns
//! a mono signal into an amplitude envelope and a spectral-centroid curve.

pub mod conversion;
pub mod envelope;
pub mod filters;
pub mod spectral;
