pub mod article;
pub mod cluster;
pub mod issue;

pub use article::*;
pub use cluster::*;
pub use issue::*;
