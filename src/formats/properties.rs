use crate::result::{TerrainError, TerrainResult};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    fmt::Write,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// A `key=value` properties file, as written next to every layer of a landscape.
///
/// Supports `#` and `!` comments, `=`, `:` or whitespace separators and lines continued with
/// a trailing backslash.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
    path: PathBuf,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Stores a list of values separated by commas.
    pub fn set_array<T: ToString>(&mut self, key: &str, values: &[T]) {
        let value = values.iter().map(ToString::to_string).join(",");
        self.entries.insert(key.to_string(), value);
    }

    /// Parses an optional value.
    pub fn parse<T>(&self, key: &'static str) -> TerrainResult<Option<T>>
    where
        T: FromStr,
        TerrainError: From<T::Err>,
    {
        self.get(key)
            .map(|value| value.trim().parse::<T>().map_err(TerrainError::from))
            .transpose()
    }

    /// Parses a value that has to be present.
    pub fn require<T>(&self, key: &'static str) -> TerrainResult<T>
    where
        T: FromStr,
        TerrainError: From<T::Err>,
    {
        self.parse(key)?.ok_or_else(|| self.missing(key))
    }

    /// Parses a list of values separated by commas.
    pub fn require_array<T>(&self, key: &'static str) -> TerrainResult<Vec<T>>
    where
        T: FromStr,
        TerrainError: From<T::Err>,
    {
        let value = self.get(key).ok_or_else(|| self.missing(key))?;

        value
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<T>().map_err(TerrainError::from))
            .collect()
    }

    pub(crate) fn missing(&self, key: &'static str) -> TerrainError {
        TerrainError::MissingProperty {
            key,
            path: self.path.clone(),
        }
    }

    pub fn decode_alloc(encoded: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut lines = encoded.lines();

        while let Some(line) = lines.next() {
            let line = line.trim_start();

            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let mut logical = line.to_string();

            while ends_with_continuation(&logical) {
                logical.pop();

                match lines.next() {
                    Some(next) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }

            let (key, value) = split_entry(&logical);
            entries.insert(unescape(key), unescape(value));
        }

        Self {
            entries,
            path: PathBuf::new(),
        }
    }

    pub fn encode_alloc(&self) -> String {
        let mut encoded = String::new();

        for (key, value) in &self.entries {
            // writing into a String never fails
            let _ = writeln!(encoded, "{}={}", escape(key, true), escape(value, false));
        }

        encoded
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> TerrainResult<Self> {
        let encoded = fs::read_to_string(&path)?;

        let mut properties = Self::decode_alloc(&encoded);
        properties.path = path.as_ref().to_path_buf();

        Ok(properties)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> TerrainResult<()> {
        fs::write(path, self.encode_alloc())?;
        Ok(())
    }
}

fn ends_with_continuation(line: &str) -> bool {
    let backslashes = line.chars().rev().take_while(|&c| c == '\\').count();
    backslashes % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;

    for (index, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' => {
                let key = &line[..index];
                let mut value = line[index..].trim_start_matches([' ', '\t']);

                if c.is_whitespace() {
                    value = value.strip_prefix(['=', ':']).unwrap_or(value);
                } else {
                    value = &value[1..];
                }

                return (key, value.trim_start_matches([' ', '\t']));
            }
            _ => {}
        }
    }

    (line, "")
}

fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }

        match chars.next() {
            Some('t') => unescaped.push('\t'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some(other) => unescaped.push(other),
            None => {}
        }
    }

    unescaped
}

fn escape(text: &str, is_key: bool) -> String {
    let mut escaped = String::with_capacity(text.len());

    for (index, c) in text.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '=' | ':' | '#' | '!' => {
                escaped.push('\\');
                escaped.push(c);
            }
            ' ' if is_key || index == 0 => escaped.push_str("\\ "),
            _ => escaped.push(c),
        }
    }

    escaped
}
