pub mod defs;
pub mod gate;
pub mod references;
