/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Arguments};
use std::io::{self, IsTerminal, Write};

use chrono::Local;
use flume::{Receiver, Sender};
use slog::{Drain, KV, Key, Level, OwnedKVList, Record, Serializer};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(super) struct LogValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: String,
}

impl LogValue {
    fn message_str(&self) -> &str {
        if self.message.is_empty() {
            "()"
        } else {
            &self.message
        }
    }
}

#[derive(Default)]
struct KvCollector(Vec<(String, String)>);

impl Serializer for KvCollector {
    fn emit_arguments(&mut self, key: Key, val: &Arguments) -> slog::Result {
        self.0.push((key.to_string(), val.to_string()));
        Ok(())
    }
}

/// A slog drain which hands formatted records over to a dedicated io thread.
///
/// Records are dropped if the channel is full.
pub struct StdioDrain {
    sender: Sender<LogValue>,
}

impl StdioDrain {
    pub fn spawn(thread_name: &str, channel_size: usize, append_code_position: bool) -> Self {
        let (sender, receiver) = flume::bounded::<LogValue>(channel_size);

        let io_thread = IoThread {
            receiver,
            append_code_position,
        };
        let _detached_thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || io_thread.run_with_stderr());

        StdioDrain { sender }
    }
}

impl Drain for StdioDrain {
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        let mut kv = KvCollector::default();
        logger_values.serialize(record, &mut kv)?;
        record.kv().serialize(record, &mut kv)?;

        let value = LogValue {
            level: record.level(),
            message: fmt::format(*record.msg()),
            kv_pairs: kv.0,
            location: format!("{}:{}", record.file(), record.line()),
        };
        // drop on overflow, never block the caller
        let _ = self.sender.try_send(value);
        Ok(())
    }
}

struct IoThread {
    receiver: Receiver<LogValue>,
    append_code_position: bool,
}

impl IoThread {
    fn run_with_stderr(self) {
        let stderr = io::stderr();
        let console = stderr.is_terminal();
        let mut io = stderr.lock();

        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            self.write_one(&mut io, &mut buf, v, console);

            while let Ok(v) = self.receiver.try_recv() {
                self.write_one(&mut io, &mut buf, v, console);
            }
            let _ = io.flush();
        }
    }

    fn write_one<IO: Write>(&self, io: &mut IO, buf: &mut Vec<u8>, v: LogValue, console: bool) {
        buf.clear();
        let r = if console {
            self.write_console(buf, v)
        } else {
            self.write_plain(buf, v)
        };
        if r.is_ok() {
            let _ = io.write_all(buf);
        }
    }

    fn write_plain<IO: Write>(&self, io: &mut IO, v: LogValue) -> io::Result<()> {
        write!(io, "{}", Local::now().format(TIME_FORMAT))?;
        write!(io, " {}", v.level)?;
        for (k, v) in &v.kv_pairs {
            write!(io, " {k}: {v},")?;
        }
        write!(io, " {}", v.message_str())?;
        if self.append_code_position {
            write!(io, " <{}>", v.location)?;
        }
        writeln!(io)
    }

    fn write_console<IO: Write>(&self, io: &mut IO, v: LogValue) -> io::Result<()> {
        use anstyle::{AnsiColor, Color, Style};

        const COLOR_MAGENTA: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta)));
        const COLOR_RED: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
        const COLOR_YELLOW: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
        const COLOR_GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
        const COLOR_CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
        const COLOR_BLUE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue)));
        const STYLE_BOLD: Style = Style::new().bold();

        let level_color = match v.level {
            Level::Critical => COLOR_MAGENTA,
            Level::Error => COLOR_RED,
            Level::Warning => COLOR_YELLOW,
            Level::Info => COLOR_GREEN,
            Level::Debug => COLOR_CYAN,
            Level::Trace => COLOR_BLUE,
        };

        write!(io, "{}", Local::now().format(TIME_FORMAT))?;
        write!(
            io,
            " {}{}{}",
            level_color.render(),
            v.level,
            level_color.render_reset()
        )?;
        for (k, v) in &v.kv_pairs {
            write!(
                io,
                " {}{k}{}={v},",
                STYLE_BOLD.render(),
                STYLE_BOLD.render_reset()
            )?;
        }
        write!(
            io,
            " {}{}{}",
            STYLE_BOLD.render(),
            v.message_str(),
            STYLE_BOLD.render_reset()
        )?;
        if self.append_code_position {
            write!(io, " <{}>", v.location)?;
        }
        writeln!(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(message: &str) -> LogValue {
        LogValue {
            level: Level::Warning,
            message: message.to_string(),
            kv_pairs: vec![("key".to_string(), "demo".to_string())],
            location: "resolve/mod.rs:42".to_string(),
        }
    }

    #[test]
    fn plain_format() {
        let (_sender, receiver) = flume::bounded(1);
        let t = IoThread {
            receiver,
            append_code_position: true,
        };
        let mut buf = Vec::new();
        t.write_plain(&mut buf, value("upstream timed out")).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(" WARN key: demo, upstream timed out <resolve/mod.rs:42>\n"));
    }

    #[test]
    fn plain_format_empty_message() {
        let (_sender, receiver) = flume::bounded(1);
        let t = IoThread {
            receiver,
            append_code_position: false,
        };
        let mut buf = Vec::new();
        t.write_plain(&mut buf, value("")).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(" WARN key: demo, ()\n"));
    }
}
