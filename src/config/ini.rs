//! Ini parsing and `%(name)s` interpolation
//!
//! The accepted syntax follows the classic configparser dialect the
//! provisioner configs were written for:
//!
//! ```ini
//! [DEFAULT]
//! base = %(HOME)s/provision
//!
//! [web]
//! stage2_dir = %(base)s/web
//! stage2_script: bootstrap.sh
//! ```
//!
//! Keys keep their case. Indented lines continue the previous value.

use crate::exceptions::ConfigError;
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the fallback section every system inherits from
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Nesting limit for `%(name)s` expansion, also catches reference cycles
pub const MAX_INTERPOLATION_DEPTH: usize = 10;

/// Key/value pairs of one section
pub type Entries = BTreeMap<String, String>;

/// A parsed ini file: the DEFAULT section plus named sections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    defaults: Entries,
    sections: BTreeMap<String, Entries>,
}

impl IniDocument {
    /// Read and parse an ini file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse ini text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut doc = IniDocument::default();
        let mut seen_default_header = false;
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (idx, line) in content.lines().enumerate() {
            let line_num = idx + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = line.starts_with(' ') || line.starts_with('\t');
            if indented {
                if let (Some(section), Some(key)) = (current.as_deref(), last_key.as_deref()) {
                    if let Some(value) = doc.entries_mut(section).get_mut(key) {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                    continue;
                }
            }

            if let Some(name) = parse_section_header(trimmed) {
                if name.is_empty() {
                    return Err(parse_error(line_num, "empty section name"));
                }
                let duplicate = if name == DEFAULT_SECTION {
                    std::mem::replace(&mut seen_default_header, true)
                } else {
                    doc.sections
                        .insert(name.to_string(), Entries::new())
                        .is_some()
                };
                if duplicate {
                    return Err(parse_error(
                        line_num,
                        &format!("section [{name}] already defined"),
                    ));
                }
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            let Some(section) = current.as_deref() else {
                return Err(parse_error(
                    line_num,
                    &format!("entry outside of section: {trimmed}"),
                ));
            };
            let Some((key, value)) = parse_kv_line(trimmed) else {
                return Err(parse_error(
                    line_num,
                    &format!("invalid key-value pair: {trimmed}"),
                ));
            };
            let entries = doc.entries_mut(section);
            if entries.contains_key(&key) {
                return Err(parse_error(
                    line_num,
                    &format!("key '{key}' already defined in [{section}]"),
                ));
            }
            entries.insert(key.clone(), value);
            last_key = Some(key);
        }

        Ok(doc)
    }

    /// Entries of the DEFAULT section
    pub fn defaults(&self) -> &Entries {
        &self.defaults
    }

    /// Set a DEFAULT key unless the file already defines it
    pub fn set_default_if_absent(&mut self, key: &str, value: &str) {
        self.defaults
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Raw (uninterpolated) entries of a named section
    pub fn section(&self, name: &str) -> Option<&Entries> {
        self.sections.get(name)
    }

    /// Names of all non-default sections
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    fn entries_mut(&mut self, section: &str) -> &mut Entries {
        if section == DEFAULT_SECTION {
            &mut self.defaults
        } else {
            self.sections.entry(section.to_string()).or_default()
        }
    }
}

/// Expand `%(name)s` references in `value` against `vars`; `%%` is a literal `%`
pub fn interpolate(key: &str, value: &str, vars: &Entries) -> Result<String, ConfigError> {
    interpolate_at_depth(key, value, vars, 1)
}

fn interpolate_at_depth(
    key: &str,
    value: &str,
    vars: &Entries,
    depth: usize,
) -> Result<String, ConfigError> {
    if depth > MAX_INTERPOLATION_DEPTH {
        return Err(interpolation_error(
            key,
            "references nested too deeply (is there a cycle?)",
        ));
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('%') {
            out.push('%');
            rest = after;
            continue;
        }

        let Some(body) = tail.strip_prefix('(') else {
            return Err(interpolation_error(
                key,
                "'%' must be followed by '%' or '('",
            ));
        };
        let Some(close) = body.find(")s") else {
            return Err(interpolation_error(key, "unterminated %(...)s reference"));
        };

        let name = &body[..close];
        let Some(raw) = vars.get(name) else {
            return Err(interpolation_error(
                key,
                &format!("unknown reference '{name}'"),
            ));
        };
        out.push_str(&interpolate_at_depth(name, raw, vars, depth + 1)?);
        rest = &body[close + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

fn parse_section_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

/// Split on whichever of `=` or `:` comes first
fn parse_kv_line(line: &str) -> Option<(String, String)> {
    let pos = line.find(['=', ':'])?;
    let key = line[..pos].trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), line[pos + 1..].trim().to_string()))
}

fn parse_error(line: usize, message: &str) -> ConfigError {
    ConfigError::Parse {
        line,
        message: message.to_string(),
    }
}

fn interpolation_error(key: &str, message: &str) -> ConfigError {
    ConfigError::Interpolation {
        key: key.to_string(),
        message: message.to_string(),
    }
}
