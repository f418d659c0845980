pub mod json;
pub mod pagination;
pub mod time;
