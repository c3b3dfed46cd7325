pub mod lowering;
pub mod reuse;
