pub mod codec;
pub mod constants;
pub mod link;
pub mod scanner;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
