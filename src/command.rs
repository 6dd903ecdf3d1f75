// Copyright 2026 OPeNDAP, Inc.

//! Builder for the XML request documents the BES accepts.
//!
//! Only document *construction* lives here. Responses travel back as
//! opaque bytes and are left to the caller to interpret.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::thread;

pub const BES_NAMESPACE: &str = "http://xml.opendap.org/ns/bes/1.0#";
pub const REQUEST_ID: &str = "reqID";
pub const XDAP_ACCEPT_CONTEXT: &str = "xdap_accept";
pub const ERRORS_CONTEXT: &str = "errors";
pub const BES_TIMEOUT_CONTEXT: &str = "bes_timeout";

fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(|c: char| matches!(c, '&' | '<' | '>' | '"' | '\'')) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Request id identifying the calling thread, in the form the OLFS uses.
pub fn thread_request_id() -> String {
    let current = thread::current();
    format!(
        "[thread:{}-{:?}]",
        current.name().unwrap_or("unnamed"),
        current.id()
    )
}

/// One command element inside a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
}

impl CommandElement {
    pub fn new(name: impl Into<String>) -> CommandElement {
        CommandElement {
            name: name.into(),
            attributes: Vec::new(),
            text: None,
        }
    }

    pub fn attr(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> CommandElement {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> CommandElement {
        self.text = Some(text.into());
        self
    }

    fn write_xml(&self, out: &mut String) {
        let _ = write!(out, "<{}", self.name);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", name, escape(value));
        }
        match &self.text {
            Some(text) => {
                let _ = write!(out, ">{}</{}>", escape(text), self.name);
            }
            None => out.push_str(" />"),
        }
    }
}

/// A BES request document: context settings followed by commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BesCommand {
    request_id: String,
    contexts: Vec<CommandElement>,
    commands: Vec<CommandElement>,
}

impl Default for BesCommand {
    fn default() -> Self {
        BesCommand::new()
    }
}

impl BesCommand {
    pub fn new() -> BesCommand {
        BesCommand::with_request_id(thread_request_id())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> BesCommand {
        BesCommand {
            request_id: request_id.into(),
            contexts: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn show_version() -> BesCommand {
        BesCommand::new().command(CommandElement::new("showVersion"))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_context(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> BesCommand {
        self.contexts.push(
            CommandElement::new("setContext")
                .attr("name", name)
                .text(value),
        );
        self
    }

    pub fn command(mut self, element: CommandElement) -> BesCommand {
        self.commands.push(element);
        self
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = write!(
            out,
            "<request xmlns=\"{}\" {}=\"{}\">",
            BES_NAMESPACE,
            REQUEST_ID,
            escape(&self.request_id)
        );
        for element in self.contexts.iter().chain(self.commands.iter()) {
            element.write_xml(&mut out);
        }
        out.push_str("</request>");
        out
    }
}
