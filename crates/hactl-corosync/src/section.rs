//! Ordered section/attribute tree for the corosync.conf text format
//!
//! The format is line oriented: `key: value` attribute lines, nested
//! `name {` ... `}` blocks, four spaces of indentation per nesting
//! level, one blank line between sibling sections. Attribute order and
//! duplicates are preserved, so a parsed tree renders back to the text
//! it came from.

/// Errors raised while parsing configuration text
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfParseError {
    #[error("unexpected closing brace on line {0}")]
    UnexpectedClosingBrace(usize),

    #[error("missing closing brace")]
    MissingClosingBrace,

    #[error("unable to parse line {0}: '{1}'")]
    InvalidLine(usize, String),
}

/// One section of the configuration tree
///
/// The root of a parsed document is an unnamed section whose children
/// are the top-level blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigSection {
    name: String,
    attributes: Vec<(String, String)>,
    sections: Vec<ConfigSection>,
}

impl ConfigSection {
    /// Create an unnamed root section
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an attribute, keeping any existing occurrences
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.push((key.into(), value.to_string()));
    }

    /// Replace every occurrence of an attribute with a single one
    ///
    /// The new value takes the position of the first occurrence; when
    /// the key is absent the attribute is appended.
    pub fn set_attribute(&mut self, key: &str, value: impl ToString) {
        let mut first = None;
        let mut index = 0;
        self.attributes.retain(|(k, _)| {
            let keep = k != key || {
                if first.is_none() {
                    first = Some(index);
                }
                first == Some(index)
            };
            index += 1;
            keep
        });
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.add_attribute(key, value),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) {
        self.attributes.retain(|(k, _)| k != key);
    }

    /// Last occurrence wins, matching how corosync resolves duplicates
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn add_section(&mut self, section: ConfigSection) {
        self.sections.push(section);
    }

    pub fn sections(&self) -> &[ConfigSection] {
        &self.sections
    }

    pub fn sections_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigSection> {
        self.sections.iter().filter(move |s| s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut ConfigSection> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Keep only the child sections matching the predicate
    pub fn retain_sections<F>(&mut self, keep: F)
    where
        F: FnMut(&ConfigSection) -> bool,
    {
        self.sections.retain(keep);
    }

    /// Render the tree to configuration text
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.name.is_empty() {
            self.render_children(&mut out, 0);
        } else {
            self.render_block(&mut out, 0);
        }
        out
    }

    fn render_block(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        out.push_str(&indent);
        out.push_str(&self.name);
        out.push_str(" {\n");
        self.render_children(out, depth + 1);
        out.push_str(&indent);
        out.push_str("}\n");
    }

    fn render_children(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        for (key, value) in &self.attributes {
            out.push_str(&indent);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 || !self.attributes.is_empty() {
                out.push('\n');
            }
            section.render_block(out, depth);
        }
    }

    /// Parse configuration text into an unnamed root section
    ///
    /// Blank lines and `#` comments are skipped; anything else must be
    /// an attribute line, a section opener or a closing brace.
    pub fn parse(text: &str) -> Result<ConfigSection, ConfParseError> {
        let mut stack = vec![ConfigSection::root()];
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let number = number + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "}" {
                if stack.len() == 1 {
                    return Err(ConfParseError::UnexpectedClosingBrace(number));
                }
                let finished = stack.pop().expect("stack is never empty");
                stack
                    .last_mut()
                    .expect("root stays on the stack")
                    .add_section(finished);
            } else if let Some(name) = line.strip_suffix('{') {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfParseError::InvalidLine(number, raw.to_string()));
                }
                stack.push(ConfigSection::new(name));
            } else if let Some((key, value)) = line.split_once(':') {
                stack
                    .last_mut()
                    .expect("root stays on the stack")
                    .add_attribute(key.trim(), value.trim());
            } else {
                return Err(ConfParseError::InvalidLine(number, raw.to_string()));
            }
        }
        if stack.len() != 1 {
            return Err(ConfParseError::MissingClosingBrace);
        }
        Ok(stack.pop().expect("root stays on the stack"))
    }
}
