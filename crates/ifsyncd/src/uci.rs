//! UCI package files
//!
//! A package is a plain-text file under the config directory holding typed
//! sections with options and lists:
//!
//! ```text
//! config interface 'lan'
//!         option ifname 'eth0'
//!         option proto 'static'
//!         list dns '1.1.1.1'
//! ```
//!
//! [`UciContext`] brackets every access with a load and an unload, so no
//! package stays loaded once a call returns.

use ifsync_common::{IfsyncError, IfsyncResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// Value of an option: a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciValue {
    Single(String),
    List(Vec<String>),
}

/// One `config` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciSection {
    pub name: String,
    pub section_type: String,
    /// Anonymous sections get a generated name, unique within the package,
    /// that is not written back.
    pub anonymous: bool,
    options: Vec<(String, UciValue)>,
}

impl UciSection {
    pub fn new(section_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section_type: section_type.into(),
            anonymous: false,
            options: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&UciValue> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Value of a single-valued option.
    pub fn option(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(UciValue::Single(v)) => Some(v),
            _ => None,
        }
    }

    /// Set an option, replacing any previous value in place.
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) {
        let value = UciValue::Single(value.into());
        match self.options.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.options.push((key.to_string(), value)),
        }
    }

    /// Append to a list option, converting a single value into a list.
    pub fn add_list(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| k == key) {
            Some((_, UciValue::List(items))) => items.push(value),
            Some((_, v @ UciValue::Single(_))) => {
                if let UciValue::Single(prev) = std::mem::replace(v, UciValue::List(Vec::new())) {
                    *v = UciValue::List(vec![prev, value]);
                }
            }
            None => self.options.push((key.to_string(), UciValue::List(vec![value]))),
        }
    }

    /// Remove an option. Returns false if it was not present.
    pub fn remove_option(&mut self, key: &str) -> bool {
        let before = self.options.len();
        self.options.retain(|(k, _)| k != key);
        self.options.len() != before
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, &UciValue)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A parsed package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UciPackage {
    pub name: String,
    sections: Vec<UciSection>,
}

impl UciPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
        }
    }

    /// Parse package text.
    pub fn parse(name: &str, text: &str) -> IfsyncResult<Self> {
        let mut package = Self::new(name);
        let mut current: Option<usize> = None;

        for (lineno, line) in text.lines().enumerate() {
            let tokens = tokenize(line).map_err(|msg| {
                IfsyncError::store(name, "parse", format!("line {}: {}", lineno + 1, msg))
            })?;

            let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
            match words.as_slice() {
                [] => {}
                ["package", ..] => {}
                ["config", section_type] => {
                    let mut section = UciSection::new(*section_type, String::new());
                    section.anonymous = true;
                    package.sections.push(section);
                    current = Some(package.sections.len() - 1);
                }
                ["config", section_type, section_name] => {
                    let idx = match package.position(section_name) {
                        Some(idx) => idx,
                        None => {
                            package
                                .sections
                                .push(UciSection::new(*section_type, *section_name));
                            package.sections.len() - 1
                        }
                    };
                    current = Some(idx);
                }
                [kind @ ("option" | "list"), key, value] => {
                    let idx = current.ok_or_else(|| {
                        IfsyncError::store(
                            name,
                            "parse",
                            format!("line {}: {} outside of a section", lineno + 1, kind),
                        )
                    })?;
                    let section = &mut package.sections[idx];
                    if *kind == "option" {
                        section.set_option(key, *value);
                    } else {
                        section.add_list(key, *value);
                    }
                }
                _ => {
                    return Err(IfsyncError::store(
                        name,
                        "parse",
                        format!("line {}: unrecognized statement", lineno + 1),
                    ));
                }
            }
        }

        package.name_anonymous_sections();
        Ok(package)
    }

    /// Give every anonymous section a `cfgNNNNNN` name, skipping names that
    /// a named section already uses.
    fn name_anonymous_sections(&mut self) {
        let mut taken: HashSet<String> = self
            .sections
            .iter()
            .filter(|s| !s.anonymous)
            .map(|s| s.name.clone())
            .collect();

        for (idx, section) in self.sections.iter_mut().enumerate() {
            if !section.anonymous {
                continue;
            }
            let mut counter = idx;
            let mut name = format!("cfg{:06x}", counter);
            while taken.contains(&name) {
                counter += 1;
                name = format!("cfg{:06x}", counter);
            }
            taken.insert(name.clone());
            section.name = name;
        }
    }

    /// Render the package in UCI file syntax.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if section.anonymous {
                let _ = writeln!(out, "\nconfig {}", section.section_type);
            } else {
                let _ = writeln!(out, "\nconfig {} {}", section.section_type, quote(&section.name));
            }
            for (key, value) in section.options() {
                match value {
                    UciValue::Single(v) => {
                        let _ = writeln!(out, "\toption {} {}", key, quote(v));
                    }
                    UciValue::List(items) => {
                        for item in items {
                            let _ = writeln!(out, "\tlist {} {}", key, quote(item));
                        }
                    }
                }
            }
        }
        out
    }

    /// Index of the named (non-anonymous) section called `name`.
    fn position(&self, name: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| !s.anonymous && s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&UciSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut UciSection> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &UciSection> {
        self.sections.iter()
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Split one line into words, honoring single quotes, double quotes and
/// backslash escapes. A `#` at the start of a word ends the line.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None | Some('#') => break,
            _ => {}
        }

        let mut token = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            match c {
                '\'' => loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => token.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                },
                '"' => loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => token.push(ch),
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(ch) => token.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                },
                '\\' => {
                    if let Some(ch) = chars.next() {
                        token.push(ch);
                    }
                }
                _ => token.push(c),
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

/// Access to the packages under one config directory.
#[derive(Debug)]
pub struct UciContext {
    config_dir: PathBuf,
    loaded: Mutex<HashSet<String>>,
}

impl UciContext {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            loaded: Mutex::new(HashSet::new()),
        }
    }

    /// Number of packages currently loaded. Zero between calls.
    pub fn loaded_packages(&self) -> usize {
        self.loaded.lock().len()
    }

    fn path_of(&self, package: &str) -> PathBuf {
        self.config_dir.join(package)
    }

    fn load(&self, package: &str) -> IfsyncResult<UciPackage> {
        let path = self.path_of(package);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            IfsyncError::store(package, "load", format!("{}: {}", path.display(), e))
        })?;
        let parsed = UciPackage::parse(package, &text)?;
        self.loaded.lock().insert(package.to_string());
        trace!(package, "Loaded package");
        Ok(parsed)
    }

    fn unload(&self, package: &str) {
        self.loaded.lock().remove(package);
        trace!(package, "Unloaded package");
    }

    /// Write the package to a temp file next to it and rename it into
    /// place. The file on disk is either the old or the new content.
    fn save(&self, package: &UciPackage) -> IfsyncResult<()> {
        let path = self.path_of(&package.name);
        let fail = |e: std::io::Error| {
            IfsyncError::store(&package.name, "save", format!("{}: {}", path.display(), e))
        };

        let mut staged = NamedTempFile::new_in(&self.config_dir).map_err(fail)?;
        staged
            .write_all(package.serialize().as_bytes())
            .map_err(fail)?;
        if let Ok(meta) = std::fs::metadata(&path) {
            staged
                .as_file()
                .set_permissions(meta.permissions())
                .map_err(fail)?;
        }
        staged.as_file().sync_all().map_err(fail)?;
        staged.persist(&path).map_err(|e| fail(e.error))?;

        debug!(package = %package.name, "Saved package");
        Ok(())
    }

    /// Run `f` over a freshly loaded package. The package is unloaded
    /// before returning.
    pub fn with_package<R>(
        &self,
        package: &str,
        f: impl FnOnce(&UciPackage) -> R,
    ) -> IfsyncResult<R> {
        let loaded = self.load(package)?;
        let result = f(&loaded);
        self.unload(package);
        Ok(result)
    }

    /// Run `f` over a freshly loaded package and save it if `f` succeeds.
    /// The package is unloaded before returning, success or failure.
    pub fn with_package_mut<R>(
        &self,
        package: &str,
        f: impl FnOnce(&mut UciPackage) -> IfsyncResult<R>,
    ) -> IfsyncResult<R> {
        let mut loaded = self.load(package)?;
        let result = f(&mut loaded).and_then(|r| self.save(&loaded).map(|()| r));
        self.unload(package);
        result
    }
}
