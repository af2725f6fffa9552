pub mod eval;
pub mod lint;
pub mod resolve;
