pub mod glob;
pub mod tar;
pub mod types;
