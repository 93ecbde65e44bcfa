#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod client;
pub mod protocol;
