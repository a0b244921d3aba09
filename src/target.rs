//! Parsing of `Type:id[,id...]` download target arguments.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Target syntax: a capitalized model type name, a colon, and comma-separated ids.
#[allow(clippy::expect_used)]
static TARGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z]*):(\d+(?:,\d+)*)$").expect("target regex is valid") // Static pattern, safe to panic
});

/// A user-specified object to download, e.g. `Dataset:51,52`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Model type name as understood by the server (`Project`, `Dataset`, `Image`, ...).
    pub kind: String,
    /// Ids of objects of that type, in the order given.
    pub ids: Vec<i64>,
}

/// Errors from target argument parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The argument does not match `Type:id[,id...]`.
    #[error("cannot parse Target:ids argument: {input}")]
    Syntax {
        /// The offending argument.
        input: String,
    },

    /// An id does not fit in a signed 64-bit integer.
    #[error("id out of range in target argument: {input}")]
    IdOutOfRange {
        /// The offending argument.
        input: String,
    },

    /// No target arguments were given.
    #[error("no download targets specified")]
    Empty,
}

impl Target {
    /// Parses a single `Type:id[,id...]` argument.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Syntax`] if the argument is malformed and
    /// [`TargetError::IdOutOfRange`] if an id overflows `i64`.
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let captures = TARGET_PATTERN
            .captures(input.trim())
            .ok_or_else(|| TargetError::Syntax {
                input: input.to_string(),
            })?;

        let kind = captures[1].to_string();
        let ids = captures[2]
            .split(',')
            .map(str::parse::<i64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TargetError::IdOutOfRange {
                input: input.to_string(),
            })?;

        debug!(kind = %kind, count = ids.len(), "parsed target");
        Ok(Self { kind, ids })
    }
}

/// Parses every target argument, failing on the first malformed one.
///
/// # Errors
///
/// Returns [`TargetError::Empty`] when `args` is empty, otherwise the first
/// error from [`Target::parse`].
pub fn parse_targets<S: AsRef<str>>(args: &[S]) -> Result<Vec<Target>, TargetError> {
    if args.is_empty() {
        return Err(TargetError::Empty);
    }
    args.iter().map(|arg| Target::parse(arg.as_ref())).collect()
}

/// Groups targets by type, merging and de-duplicating ids.
///
/// The result is what the server's "find children" operation expects.
#[must_use]
pub fn group_by_kind(targets: &[Target]) -> BTreeMap<String, Vec<i64>> {
    let mut grouped: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for target in targets {
        grouped
            .entry(target.kind.clone())
            .or_default()
            .extend(&target.ids);
    }
    for ids in grouped.values_mut() {
        ids.sort_unstable();
        ids.dedup();
    }
    grouped
}
