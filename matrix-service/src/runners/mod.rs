// Runners Module
// Step command runners used by the job executor

pub mod shell;

pub use shell::{OutputCallback, Shell, ShellOutput, ShellRunner};
