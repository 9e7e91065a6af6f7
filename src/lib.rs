pub mod cmd;
pub mod config;
pub mod gecko;
pub mod hook;
pub mod obj;
pub mod ppc;
pub mod project;
pub mod toolchain;
pub mod util;
