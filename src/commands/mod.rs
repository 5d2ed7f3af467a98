pub mod cache;
pub mod run;

pub use run::run;
