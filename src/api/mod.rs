// Entry points for embedding applications.

pub mod simple;
