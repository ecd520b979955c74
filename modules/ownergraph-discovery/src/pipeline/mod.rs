pub mod aggregate;
pub mod recorder;
pub mod router;
pub mod run;
