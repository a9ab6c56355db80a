pub mod office;
pub mod probe;
