//! Coprocessor boundary for the MXP vector unit.
//!
//! The convolution engine's vector strategy issues its block
//! multiply-accumulates through the [`VectorBackend`] trait. Configuration
//! (lane count, scratchpad size, fractional-bit widths) happens once at
//! startup; afterwards every call is synchronous and returns a completed
//! result.
//!
//! # Quick start
//!
//! ```
//! use mxp_driver::{select_backend, CoprocConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut coproc = select_backend(CoprocConfig::SIMULATOR)?;
//!
//! let mut acc = vec![0i64; 4];
//! coproc.vmac(&mut acc, &[3, 3, 3, 3], &[1, 2, 3, 4])?;
//! assert_eq!(acc, vec![3, 6, 9, 12]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod capabilities;
mod error;

pub use backend::{select_backend, BackendType, VectorBackend, VectorStats};
pub use backends::SoftwareBackend;
pub use capabilities::Capabilities;
pub use error::{MxpError, Result};
pub use mxp_chip::{CoprocConfig, ElementWidth, FracWidths};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        select_backend, Capabilities, CoprocConfig, MxpError, Result, SoftwareBackend,
        VectorBackend,
    };
}
