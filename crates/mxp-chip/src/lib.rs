//! Silicon model for the MXP soft vector coprocessor.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the coprocessor: vector lane count, scratchpad capacity,
//! masked-wave limit, and the fractional-bit widths used by the fixed-point
//! multiply instructions for each element width.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `CoprocConfig` and the reference simulator preset (16 lanes, 64 KB) |
//! | [`width`] | Element widths (word/half/byte) and their sizes in bytes |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod width;

pub use config::{CoprocConfig, FracWidths};
pub use width::ElementWidth;
