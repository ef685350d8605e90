//! Command lines and the lookup table that resolves them
//!
//! Every request in the system is a single whitespace-delimited line. The
//! first token names the command, the rest are its arguments. Tables map
//! names (and aliases) to a declared arity and a handler of any type.

use std::collections::HashMap;

use crate::error::ShareError;

/// Name, arity and usage of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for commands taking a variable tail
    pub max_args: Option<usize>,
    pub usage: &'static str,
}

impl CommandSpec {
    /// A command taking exactly `args` arguments
    pub const fn exact(name: &'static str, args: usize, usage: &'static str) -> Self {
        Self { name, min_args: args, max_args: Some(args), usage }
    }

    /// A command taking at least `min_args` arguments
    pub const fn at_least(name: &'static str, min_args: usize, usage: &'static str) -> Self {
        Self { name, min_args, max_args: None, usage }
    }

    fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }
}

/// Split a command line into tokens
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// A resolved command line
#[derive(Debug)]
pub struct Resolved<'t, 'l, H> {
    pub spec: &'t CommandSpec,
    pub handler: &'t H,
    pub args: Vec<&'l str>,
}

/// Lookup table from command name to spec and handler
#[derive(Debug)]
pub struct CommandTable<H> {
    entries: HashMap<&'static str, (CommandSpec, H)>,
    aliases: HashMap<&'static str, &'static str>,
}

impl<H> Default for CommandTable<H> {
    fn default() -> Self {
        Self { entries: HashMap::new(), aliases: HashMap::new() }
    }
}

impl<H> CommandTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command
    pub fn with(mut self, spec: CommandSpec, handler: H) -> Self {
        self.entries.insert(spec.name, (spec, handler));
        self
    }

    /// Make `alias` resolve to the already registered `target`
    pub fn with_alias(mut self, alias: &'static str, target: &'static str) -> Self {
        self.aliases.insert(alias, target);
        self
    }

    /// Resolve a line into its command and arguments, checking arity
    pub fn resolve<'t, 'l>(&'t self, line: &'l str) -> Result<Resolved<'t, 'l, H>, ShareError> {
        let mut tokens = tokenize(line).into_iter();
        let name = tokens.next().ok_or_else(|| ShareError::argument_error("Empty command"))?;
        let key = self.aliases.get(name).copied().unwrap_or(name);

        let (spec, handler) = self
            .entries
            .get(key)
            .ok_or_else(|| ShareError::argument_error_with_field(format!("Unknown command: {}", name), "command"))?;

        let args: Vec<&str> = tokens.collect();
        if !spec.accepts(args.len()) {
            return Err(ShareError::argument_error(format!("Usage: {}", spec.usage)));
        }

        Ok(Resolved { spec, handler, args })
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn usages(&self) -> Vec<&'static str> {
        let mut specs: Vec<_> = self.entries.values().map(|(spec, _)| spec).collect();
        specs.sort_by_key(|spec| spec.name);
        specs.into_iter().map(|spec| spec.usage).collect()
    }
}
