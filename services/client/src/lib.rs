pub mod adapters;
pub mod config;
pub mod error;
pub mod room;

#[cfg(test)]
mod testing;
