pub mod command;
pub mod file;
pub mod join;
pub mod sample;
pub mod streams;
pub mod system;

#[cfg(test)]
pub(crate) mod test_support;
