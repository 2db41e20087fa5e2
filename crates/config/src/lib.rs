#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `config` is the layered parameter store. Values come from, in increasing
//! precedence:
//!
//! 1. built-in defaults,
//! 2. a system config file,
//! 3. a user config file,
//! 4. environment variables,
//! 5. runtime directives set through [`Params::set`].
//!
//! Directives and queries share one grammar: space-separated `KEY=VALUE`
//! tokens with arbitrary blanks around `=`. In a directive, pairs after the
//! first nest under the first pair's value node, so
//! `STORE=/dev/shm GROUP=NODE COUNT=1` describes a subtree of the `STORE`
//! value `/dev/shm`. A query uses the same qualifiers with a trailing bare
//! key: `STORE=/dev/shm COUNT` answers `1`.
//!
//! Values may reference `$VAR` and `${VAR}`, expanded from the environment
//! at lookup time; an undefined variable expands to the empty string and an
//! unterminated `${` stays literal.

use std::path::Path;

use kvtree::KvTree;
use thiserror::Error;

/// Result type for parameter operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while parsing directives or loading config files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The directive or query text does not follow the grammar.
    #[error("malformed parameter directive {text:?}: {detail}")]
    Malformed {
        /// Offending input.
        text: String,
        /// What went wrong.
        detail: String,
    },

    /// The key may only be read from the environment or config files.
    #[error("parameter {key} cannot be set at runtime")]
    NotSettable {
        /// Offending key.
        key: String,
    },

    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File being read.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Keys that runtime directives may not change; they are read from the
/// environment or config files only.
const PROTECTED_KEYS: &[&str] = &["SCR_DB_ENABLE", "SCR_DB_NAME", "SCR_DB_HOST", "SCR_DB_USER"];

/// One parsed `KEY=VALUE` or bare `KEY` token.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Pair {
    key: String,
    value: Option<String>,
}

/// Normalizes blanks around `=` and splits into pairs.
fn parse_pairs(text: &str) -> ConfigResult<Vec<Pair>> {
    let mut normalized = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '=' {
            while normalized.ends_with(' ') || normalized.ends_with('\t') {
                normalized.pop();
            }
            normalized.push('=');
            while matches!(chars.peek(), Some(' ' | '\t')) {
                chars.next();
            }
        } else {
            normalized.push(c);
        }
    }

    let mut pairs = Vec::new();
    for token in normalized.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) => {
                if key.is_empty() || value.contains('=') {
                    return Err(ConfigError::Malformed {
                        text: text.to_owned(),
                        detail: format!("bad token {token:?}"),
                    });
                }
                pairs.push(Pair {
                    key: key.to_owned(),
                    value: Some(value.to_owned()),
                });
            }
            None => pairs.push(Pair {
                key: token.to_owned(),
                value: None,
            }),
        }
    }
    Ok(pairs)
}

/// Expands `$VAR` and `${VAR}` references from the environment.
///
/// Undefined variables expand to the empty string; a `${` with no closing
/// brace, or a braced name containing characters outside `[A-Za-z0-9_]`,
/// stays literal.
#[must_use]
pub fn expand_env(value: &str) -> String {
    fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if i + 1 < chars.len() && chars[i + 1] == '{' {
            // braced form: require a well-formed name up to '}'
            let mut j = i + 2;
            while j < chars.len() && is_name_char(chars[j]) {
                j += 1;
            }
            if j < chars.len() && chars[j] == '}' && j > i + 2 {
                let name: String = chars[i + 2..j].iter().collect();
                out.push_str(&std::env::var(&name).unwrap_or_default());
                i = j + 1;
            } else {
                // unterminated or bad name: keep the text as written
                out.push('$');
                i += 1;
            }
        } else {
            let mut j = i + 1;
            while j < chars.len() && is_name_char(chars[j]) {
                j += 1;
            }
            if j > i + 1 {
                let name: String = chars[i + 1..j].iter().collect();
                out.push_str(&std::env::var(&name).unwrap_or_default());
                i = j;
            } else {
                out.push('$');
                i += 1;
            }
        }
    }
    out
}

/// The layered parameter store.
#[derive(Debug, Default)]
pub struct Params {
    defaults: KvTree,
    system: KvTree,
    user: KvTree,
    runtime: KvTree,
}

impl Params {
    /// Creates a store holding only the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        let mut defaults = KvTree::new();
        defaults.set_str("SCR_COPY_TYPE", "XOR");
        defaults.set_int("SCR_SET_SIZE", 8);
        defaults.set_int("SCR_CACHE_SIZE", 1);
        defaults.set_int("SCR_CACHE_BYPASS", 0);
        defaults.set_int("SCR_CHECKPOINT_INTERVAL", 0);
        defaults.set_int("SCR_CHECKPOINT_SECONDS", 0);
        defaults.set_int("SCR_CRC_ON_FLUSH", 1);
        defaults.set_int("SCR_FILE_BUF_SIZE", 1024 * 1024);
        defaults.set_int("DEBUG", 0);
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Applies one directive line into the given layer tree.
    fn apply_to(tree: &mut KvTree, text: &str) -> ConfigResult<()> {
        let pairs = parse_pairs(text)?;
        let Some((head, rest)) = pairs.split_first() else {
            return Err(ConfigError::Malformed {
                text: text.to_owned(),
                detail: "empty directive".to_owned(),
            });
        };
        let Some(head_value) = &head.value else {
            return Err(ConfigError::Malformed {
                text: text.to_owned(),
                detail: "directives need KEY=VALUE tokens".to_owned(),
            });
        };

        if head_value.is_empty() {
            // `KEY=` clears everything recorded under the key
            tree.unset(&head.key);
            return Ok(());
        }

        let mut node = tree.set_kv(head.key.clone(), head_value.clone());
        for pair in rest {
            let Some(value) = &pair.value else {
                return Err(ConfigError::Malformed {
                    text: text.to_owned(),
                    detail: "directives need KEY=VALUE tokens".to_owned(),
                });
            };
            if value.is_empty() {
                node.unset(&pair.key);
            } else {
                node = node.set_kv(pair.key.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Applies a runtime directive, the highest-precedence layer.
    pub fn set(&mut self, text: &str) -> ConfigResult<()> {
        let pairs = parse_pairs(text)?;
        if let Some(head) = pairs.first() {
            if PROTECTED_KEYS.contains(&head.key.as_str()) {
                return Err(ConfigError::NotSettable {
                    key: head.key.clone(),
                });
            }
        }
        Self::apply_to(&mut self.runtime, text)
    }

    fn load_file(tree: &mut KvTree, path: &Path) -> ConfigResult<()> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        for raw_line in text.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            Self::apply_to(tree, line)?;
        }
        Ok(())
    }

    /// Loads the system config file into the lowest file layer.
    pub fn load_system_file(&mut self, path: &Path) -> ConfigResult<()> {
        Self::load_file(&mut self.system, path)
    }

    /// Loads the user config file, overriding the system file.
    pub fn load_user_file(&mut self, path: &Path) -> ConfigResult<()> {
        Self::load_file(&mut self.user, path)
    }

    /// Resolves qualifiers, then the final key, within one layer tree.
    fn lookup_in<'t>(tree: &'t KvTree, qualifiers: &[Pair], key: &str) -> Option<&'t KvTree> {
        let mut node = tree;
        for pair in qualifiers {
            node = node.get_kv(&pair.key, pair.value.as_deref()?)?;
        }
        node.get(key)
    }

    /// Answers a query: qualifiers then a trailing bare key.
    ///
    /// Returns `None` when no layer holds the key, or when the key holds
    /// more than one value and the answer would be ambiguous.
    #[must_use]
    pub fn get(&self, query: &str) -> Option<String> {
        let pairs = parse_pairs(query).ok()?;
        let (last, qualifiers) = pairs.split_last()?;
        if last.value.is_some() || qualifiers.iter().any(|p| p.value.is_none()) {
            return None;
        }

        // environment wins over files for simple keys
        if qualifiers.is_empty() {
            if let Some(found) = Self::lookup_in(&self.runtime, qualifiers, &last.key) {
                return value_of(found, &last.key);
            }
            if let Ok(value) = std::env::var(&last.key) {
                return Some(expand_env(&value));
            }
        } else if let Some(found) = Self::lookup_in(&self.runtime, qualifiers, &last.key) {
            return value_of(found, &last.key);
        }

        for layer in [&self.user, &self.system, &self.defaults] {
            if let Some(found) = Self::lookup_in(layer, qualifiers, &last.key) {
                return value_of(found, &last.key);
            }
        }
        None
    }

    /// [`Params::get`] parsed as an integer.
    #[must_use]
    pub fn get_int(&self, query: &str) -> Option<i64> {
        self.get(query)?.parse().ok()
    }

    /// [`Params::get`] interpreted as a boolean flag (`0` is false,
    /// anything else parseable is true).
    #[must_use]
    pub fn get_flag(&self, query: &str) -> Option<bool> {
        Some(self.get_int(query)? != 0)
    }
}

fn value_of(node: &KvTree, key: &str) -> Option<String> {
    match node.len() {
        1 => node.first_key().map(|v| expand_env(v)),
        0 => None,
        n => {
            tracing::error!(key, values = n, "parameter has multiple values");
            None
        }
    }
}
