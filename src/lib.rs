//! Cartomill turns map-layer parameters and CartoCSS style text into a
//! Mapnik-compatible XML map definition.
//!
//! The crate is layered top to bottom: [`domain`] holds the pure pieces (map
//! document assembly and cross-version style migration), [`application`]
//! orchestrates them around the compile step (in-process or through a pool of
//! disposable worker processes), and [`infra`] carries the runtime bootstrap.
//! [`config`] resolves deployment settings with file → environment → CLI
//! precedence.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
