//! Where the core reports what it is doing. Replaceable at runtime, and handed down to the memory view.

use std::{fmt, rc::Rc};

pub trait DiagnosticsSink {
    fn log(&self, level: log::Level, args: fmt::Arguments<'_>);

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Error, args)
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Warn, args)
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Info, args)
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Debug, args)
    }
}

pub type SharedDiagnostics = Rc<dyn DiagnosticsSink>;

/// Forwards everything to the `log` facade under a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct LogSink {
    target: &'static str,
}

impl LogSink {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn shared(target: &'static str) -> SharedDiagnostics {
        Rc::new(Self::new(target))
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("r3000")
    }
}

impl DiagnosticsSink for LogSink {
    fn log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        log::log!(target: self.target, level, "{args}");
    }
}

/// Keeps every message in memory, mostly useful for inspecting what happened in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: std::cell::RefCell<Vec<(log::Level, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(log::Level, String)> {
        self.entries.borrow().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.borrow().iter().any(|(_, msg)| msg.contains(needle))
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl DiagnosticsSink for RecordingSink {
    fn log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        self.entries.borrow_mut().push((level, args.to_string()));
    }
}
