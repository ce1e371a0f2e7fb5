/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use slog::{Drain, slog_o};
use slog_scope::GlobalLoggerGuard;

mod stdio;
pub use stdio::StdioDrain;

const PROCESS_LOG_THREAD_NAME: &str = "log-process";
const PROCESS_LOG_CHANNEL_SIZE: usize = 1024;

fn level_for_verbose(verbose_level: u8) -> log::Level {
    match verbose_level {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

/// Install the process wide logger.
///
/// The returned guard must be kept alive until the process exits.
pub fn setup(verbose_level: u8) -> Result<GlobalLoggerGuard, log::SetLoggerError> {
    let drain = StdioDrain::spawn(PROCESS_LOG_THREAD_NAME, PROCESS_LOG_CHANNEL_SIZE, true);
    let logger = slog::Logger::root(drain.fuse(), slog_o!());

    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(level_for_verbose(verbose_level))?;
    Ok(scope_guard)
}
