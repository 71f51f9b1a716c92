#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

pub mod backup;
pub mod bundle;
pub mod cli;
pub mod composer;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod packer;
pub mod relation;
pub mod segment;
pub mod sentinel;
pub mod stats;
pub mod storage;
pub mod task;
pub mod transform;
pub mod upload;

mod env;
mod format;
mod logger;

#[cfg(test)]
mod testing;
