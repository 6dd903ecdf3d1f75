// Copyright 2026 OPeNDAP, Inc.

use std::io;

use slog::{error, trace, Logger};

/// Runs a sequence of independent teardown steps. A failing step is logged
/// and does not stop the ones after it; nothing is ever propagated.
pub(crate) struct Teardown<'a> {
    log: &'a Logger,
    context: &'static str,
    failures: usize,
}

impl<'a> Teardown<'a> {
    pub(crate) fn new(log: &'a Logger, context: &'static str) -> Teardown<'a> {
        Teardown {
            log,
            context,
            failures: 0,
        }
    }

    pub(crate) fn step<F>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: FnOnce() -> io::Result<()>,
    {
        match f() {
            Ok(()) => trace!(self.log, "teardown step done";
                "context" => self.context, "step" => name),
            Err(e) => {
                self.failures += 1;
                error!(self.log, "unable to {}, continuing", name;
                    "context" => self.context, "error" => %e);
            }
        }
        self
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures
    }
}
