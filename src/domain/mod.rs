pub mod result;

pub use result::CalcResult;
