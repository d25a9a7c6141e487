// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    logging,
};
use ::std::{
    env,
    thread,
};

//==============================================================================
// Constants
//==============================================================================

/// Default minimum size for task stacks (bytes).
const DEFAULT_MIN_STACK_SIZE: usize = 1024 * 1024;

/// Smallest task stack the runtime will agree to allocate. Below this there
/// is not enough room to take the entry trampoline and unwind machinery.
const FLOOR_STACK_SIZE: usize = 16 * 1024;

//==============================================================================
// Structures
//==============================================================================

/// Knobs read once at kernel initialization.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum size for task stacks (bytes).
    pub min_stack_size: usize,
    /// Number of task-threads in the root scheduler.
    pub sched_threads: usize,
    /// Subsystem trace mask.
    pub log_mask: u32,
    /// Whether to start the global logger.
    pub log_on: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Config {
    /// Reads the configuration from the environment.
    ///
    /// Recognized variables: `MIN_STACK_SIZE` (bytes), `SCHED_THREADS`,
    /// `LOG_MASK` (comma-separated subsystem names), `LOG_ON`.
    pub fn from_env() -> Result<Self, Fail> {
        let mut config: Config = Config::default();

        if let Ok(value) = env::var("MIN_STACK_SIZE") {
            let size: usize = match value.parse() {
                Ok(size) => size,
                Err(_) => {
                    let cause: String = format!("malformed MIN_STACK_SIZE (value={:?})", value);
                    error!("from_env(): {}", cause);
                    return Err(Fail::new(FailKind::InvalidArgument, &cause));
                },
            };
            config.min_stack_size = size.max(FLOOR_STACK_SIZE);
        }

        if let Ok(value) = env::var("SCHED_THREADS") {
            let nthreads: usize = match value.parse() {
                Ok(nthreads) if nthreads > 0 => nthreads,
                _ => {
                    let cause: String = format!("malformed SCHED_THREADS (value={:?})", value);
                    error!("from_env(): {}", cause);
                    return Err(Fail::new(FailKind::InvalidArgument, &cause));
                },
            };
            config.sched_threads = nthreads;
        }

        if let Ok(value) = env::var("LOG_MASK") {
            config.log_mask = logging::parse_mask(&value)?;
        }

        config.log_on = env::var("LOG_ON").is_ok();

        Ok(config)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            min_stack_size: DEFAULT_MIN_STACK_SIZE,
            sched_threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            log_mask: 0,
            log_on: false,
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::Config;
    use ::anyhow::Result;

    #[test]
    fn default_config_is_sane() -> Result<()> {
        let config: Config = Config::default();
        crate::ensure_eq!(config.sched_threads >= 1, true);
        crate::ensure_eq!(config.min_stack_size >= 16 * 1024, true);
        crate::ensure_eq!(config.log_mask, 0);
        Ok(())
    }
}
