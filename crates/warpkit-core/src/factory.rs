//! Factory descriptor strings.
//!
//! Components are configured with strings of the form
//! `name[:key=value(,key=value)*]`, where a value can itself be a nested
//! descriptor in brackets, e.g.
//! `spline:rate=16,kernel=[bspline:d=3],penalty=[divcurl:weight=0.01]`.
//!
//! A [`Descriptor`] is consumed key by key. Keys that no consumer took are
//! reported by [`Descriptor::finish`], so typos never pass silently.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// A parsed `name:key=value,...` descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    source: String,
    name: String,
    params: BTreeMap<String, String>,
}

impl Descriptor {
    /// Parse a descriptor string.
    ///
    /// # Errors
    /// `Descriptor` on empty names, unbalanced brackets, missing `=` or
    /// repeated keys.
    pub fn parse(text: &str) -> Result<Self> {
        let source = text.trim().to_string();
        let (name, rest) = match find_top_level(&source, ':') {
            Some(pos) => (&source[..pos], Some(&source[pos + 1..])),
            None => (source.as_str(), None),
        };
        let name = name.trim();
        if name.is_empty() || name.contains(['[', ']', '=', ',']) {
            return Err(CoreError::descriptor(&source, "missing or malformed name"));
        }
        check_brackets(&source)?;

        let mut params = BTreeMap::new();
        if let Some(rest) = rest {
            for item in split_top_level(rest, ',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let pos = item.find('=').ok_or_else(|| {
                    CoreError::descriptor(&source, format!("expected key=value, got '{}'", item))
                })?;
                let key = item[..pos].trim().to_string();
                let mut value = item[pos + 1..].trim();
                if value.starts_with('[') && value.ends_with(']') {
                    value = &value[1..value.len() - 1];
                }
                if key.is_empty() {
                    return Err(CoreError::descriptor(&source, "empty key"));
                }
                if params.insert(key.clone(), value.trim().to_string()).is_some() {
                    return Err(CoreError::descriptor(&source, format!("key '{}' given twice", key)));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            source,
            params,
        })
    }

    /// Plugin name before the colon.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The original text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `key` is still present.
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    fn error(&self, msg: impl Into<String>) -> CoreError {
        CoreError::descriptor(&self.source, msg)
    }

    /// Take a raw string value.
    pub fn take_string(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    /// Take a parsed value or return `default` when the key is absent.
    pub fn take_or<T>(&mut self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.params.remove(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| self.error(format!("{}='{}': {}", key, raw, e))),
        }
    }

    /// Take a float and check it lies in `[lo, hi]`.
    pub fn take_f64_in(&mut self, key: &str, default: f64, lo: f64, hi: f64) -> Result<f64> {
        let value: f64 = self.take_or(key, default)?;
        if !(lo..=hi).contains(&value) {
            return Err(self.error(format!("{}={} outside [{}, {}]", key, value, lo, hi)));
        }
        Ok(value)
    }

    /// Take an integer and check it lies in `[lo, hi]`.
    pub fn take_usize_in(&mut self, key: &str, default: usize, lo: usize, hi: usize) -> Result<usize> {
        let value: usize = self.take_or(key, default)?;
        if !(lo..=hi).contains(&value) {
            return Err(self.error(format!("{}={} outside [{}, {}]", key, value, lo, hi)));
        }
        Ok(value)
    }

    /// Take a flag given as `0`, `1`, `true` or `false`.
    pub fn take_bool(&mut self, key: &str, default: bool) -> Result<bool> {
        match self.params.remove(key).as_deref() {
            None => Ok(default),
            Some("1") | Some("true") => Ok(true),
            Some("0") | Some("false") => Ok(false),
            Some(other) => Err(self.error(format!("{}='{}' is not a flag", key, other))),
        }
    }

    /// Take a value that must be one of `choices`.
    pub fn take_choice(&mut self, key: &str, default: &str, choices: &[&str]) -> Result<String> {
        let value = self.params.remove(key).unwrap_or_else(|| default.to_string());
        if !choices.contains(&value.as_str()) {
            return Err(self.error(format!("{}='{}' is not one of {:?}", key, value, choices)));
        }
        Ok(value)
    }

    /// Take a nested descriptor, parsing `default` when absent.
    pub fn take_descriptor(&mut self, key: &str, default: &str) -> Result<Descriptor> {
        let raw = self.params.remove(key).unwrap_or_else(|| default.to_string());
        Descriptor::parse(&raw)
    }

    /// Take an optional nested descriptor.
    pub fn take_optional_descriptor(&mut self, key: &str) -> Result<Option<Descriptor>> {
        self.params
            .remove(key)
            .filter(|raw| !raw.is_empty())
            .map(|raw| Descriptor::parse(&raw))
            .transpose()
    }

    /// Fail if any key was not consumed.
    pub fn finish(self) -> Result<()> {
        if self.params.is_empty() {
            return Ok(());
        }
        let unknown: Vec<&str> = self.params.keys().map(String::as_str).collect();
        Err(self.error(format!("unknown parameter(s) {:?} for '{}'", unknown, self.name)))
    }
}

impl FromStr for Descriptor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn check_brackets(text: &str) -> Result<()> {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(CoreError::descriptor(text, "unbalanced ']'"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(CoreError::descriptor(text, "unbalanced '['"));
    }
    Ok(())
}

fn find_top_level(text: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    for (pos, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            c if c == needle && depth == 0 => return Some(pos),
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (pos, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            c if c == separator && depth == 0 => {
                parts.push(&text[start..pos]);
                start = pos + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let mut d = Descriptor::parse(
            "spline:rate=16,kernel=[bspline:d=3],penalty=[divcurl:weight=0.01,curl=2]",
        )
        .unwrap();
        assert_eq!(d.name(), "spline");
        assert_eq!(d.take_or("rate", 1.0f64).unwrap(), 16.0);
        let kernel = d.take_descriptor("kernel", "bspline:d=3").unwrap();
        assert_eq!(kernel.name(), "bspline");
        let mut penalty = d.take_optional_descriptor("penalty").unwrap().unwrap();
        assert_eq!(penalty.take_or("curl", 1.0f64).unwrap(), 2.0);
        assert_eq!(penalty.take_or("weight", 1.0f64).unwrap(), 0.01);
        assert!(penalty.finish().is_ok());
        assert!(d.finish().is_ok());
    }

    #[test]
    fn test_bare_name_and_defaults() {
        let mut d = Descriptor::parse("ssd").unwrap();
        assert_eq!(d.name(), "ssd");
        assert!(d.take_bool("norm", true).unwrap());
        assert!(d.finish().is_ok());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut d = Descriptor::parse("lncc:w=3,wdith=4").unwrap();
        assert_eq!(d.take_usize_in("w", 5, 1, 256).unwrap(), 3);
        assert!(matches!(d.finish(), Err(CoreError::Descriptor { .. })));
    }

    #[test]
    fn test_bounds_and_malformed() {
        let mut d = Descriptor::parse("mi:rbins=300").unwrap();
        assert!(d.take_usize_in("rbins", 64, 1, 256).is_err());
        assert!(Descriptor::parse("spline:kernel=[bspline:d=3").is_err());
        assert!(Descriptor::parse(":rate=3").is_err());
        assert!(Descriptor::parse("gdas:maxiter").is_err());
        assert!(Descriptor::parse("gdas:a=1,a=2").is_err());
    }
}
