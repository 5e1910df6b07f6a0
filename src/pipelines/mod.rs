pub mod rnafusion;
pub mod stages;
pub mod summary;
pub mod visualization;
