pub mod forecast;
pub mod reading;
pub mod records;

pub use forecast::*;
pub use reading::*;
pub use records::*;
