// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Logging rides on the [log] facade, initialized through [flexi_logger].
//! On top of the facade the runtime keeps a subsystem trace mask: hot-path
//! trace statements name the subsystem they belong to and are emitted only
//! when the corresponding bit is set in the mask parsed from `LOG_MASK`.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::{
    Fail,
    FailKind,
};
use ::flexi_logger::Logger;
use ::std::sync::{
    atomic::{
        AtomicU32,
        Ordering,
    },
    Once,
};

//==============================================================================
// Constants
//==============================================================================

/// Subsystem bits recognized in the trace mask.
pub mod mask {
    pub const ERR: u32 = 0x1;
    pub const MEM: u32 = 0x2;
    pub const COMM: u32 = 0x4;
    pub const TASK: u32 = 0x8;
    pub const DOM: u32 = 0x10;
    pub const ULOG: u32 = 0x20;
    pub const TRACE: u32 = 0x40;
    pub const DWARF: u32 = 0x80;
    pub const CACHE: u32 = 0x100;
    pub const UPCALL: u32 = 0x200;
    pub const TIMER: u32 = 0x400;
    pub const GC: u32 = 0x800;
    pub const STDLIB: u32 = 0x1000;
    pub const SPECIAL: u32 = 0x2000;
    pub const KERN: u32 = 0x4000;
    pub const BT: u32 = 0x8000;
    pub const ALL: u32 = 0xffff_ffff;
}

/// Names accepted by [parse_mask], in bit order.
const MASK_NAMES: [(&str, u32); 17] = [
    ("err", mask::ERR),
    ("mem", mask::MEM),
    ("comm", mask::COMM),
    ("task", mask::TASK),
    ("dom", mask::DOM),
    ("ulog", mask::ULOG),
    ("trace", mask::TRACE),
    ("dwarf", mask::DWARF),
    ("cache", mask::CACHE),
    ("upcall", mask::UPCALL),
    ("timer", mask::TIMER),
    ("gc", mask::GC),
    ("stdlib", mask::STDLIB),
    ("special", mask::SPECIAL),
    ("kern", mask::KERN),
    ("bt", mask::BT),
    ("all", mask::ALL),
];

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Active subsystem trace mask.
static TRACE_MASK: AtomicU32 = AtomicU32::new(0);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
pub fn initialize(log_on: bool, trace_mask: u32) {
    INIT_LOG.call_once(|| {
        TRACE_MASK.store(trace_mask, Ordering::Relaxed);
        if log_on {
            // Logging is best-effort: a second runtime in the same process
            // finds the global logger already claimed.
            if let Ok(logger) = Logger::try_with_env() {
                let _ = logger.start();
            }
        }
    });
}

/// Queries whether any of the given subsystem bits is being traced.
pub fn is_tracing(type_bits: u32) -> bool {
    type_bits & TRACE_MASK.load(Ordering::Relaxed) != 0
}

/// Parses a comma-separated list of subsystem names into a trace mask.
pub fn parse_mask(names: &str) -> Result<u32, Fail> {
    let mut bits: u32 = 0;
    for name in names.split(',') {
        let name: &str = name.trim();
        if name.is_empty() {
            continue;
        }
        match MASK_NAMES.iter().find(|(n, _)| *n == name) {
            Some((_, bit)) => bits |= bit,
            None => {
                let cause: String = format!("unknown log mask name (name={:?})", name);
                error!("parse_mask(): {}", cause);
                return Err(Fail::new(FailKind::InvalidArgument, &cause));
            },
        }
    }
    Ok(bits)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        mask,
        parse_mask,
    };
    use ::anyhow::Result;

    #[test]
    fn parse_mask_accepts_known_names() -> Result<()> {
        crate::ensure_eq!(parse_mask("task,comm")?, mask::TASK | mask::COMM);
        crate::ensure_eq!(parse_mask("")?, 0);
        crate::ensure_eq!(parse_mask("all")?, mask::ALL);
        Ok(())
    }

    #[test]
    fn parse_mask_rejects_unknown_names() -> Result<()> {
        crate::ensure_eq!(parse_mask("bogus").is_err(), true);
        Ok(())
    }
}
