//! PPP byte stuffing and frame check sequence.
//!
//! Link-bound payloads are escaped in one pass with their FCS computed over
//! the raw bytes ([`escape`], [`PppFramer`]). Bytes coming back from the link
//! process are unstuffed incrementally by an [`Unescaper`] owned by one
//! session.

pub mod escape;
pub mod fcs;
pub mod unescape;

pub use escape::{escape, escape_with, Accm, PppFramer, CONTROL_ESCAPE, FLAG_SEQUENCE};
pub use fcs::{fcs16, GOOD_FCS16, INITIAL_FCS16};
pub use unescape::{FrameSink, Unescaper};
