pub mod batch;
pub mod client;
pub mod mapper;
pub mod preprocess;

pub use batch::*;
pub use client::*;
pub use mapper::*;
pub use preprocess::*;
