//! CLI commands.

pub mod corrupt;
pub mod losses;
pub mod scan;
