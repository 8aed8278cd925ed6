pub mod app;
pub mod cli;
pub mod compare;
pub mod config;
pub mod enumerator;
pub mod fingerprint;
pub mod injector;
pub mod observation;
pub mod output;
pub mod probe;
pub mod runner;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
