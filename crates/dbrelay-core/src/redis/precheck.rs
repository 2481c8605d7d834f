//! Reply-size precheck for cache-engine commands.
//!
//! Before a command that can return an arbitrarily large reply is sent,
//! its keys are located through the [catalog](super::catalog) and the
//! engine is asked for the size of what the command would return, using
//! cheap length and cardinality commands (`STRLEN`, `HLEN`, `LLEN`,
//! `SCARD`, `ZCARD`, `ZCOUNT`, `ZLEXCOUNT`). Anything above the limits is
//! refused without the real command ever reaching the engine.
//!
//! Unbounded cursor scans are refused outright: `SCAN`, `HSCAN`, `SSCAN`
//! and `ZSCAN` must carry an explicit `COUNT`.

use async_trait::async_trait;
use thiserror::Error;

use super::catalog::{self, CatalogError};
use crate::error::BackendError;

/// Largest string reply allowed, in bytes (1 MiB). Applies to the sum of
/// all values for multi-key reads.
pub const MAX_STRING_BYTES: u64 = 1024 * 1024;

/// Largest number of elements an enumerating command may return.
pub const MAX_ELEMENTS: u64 = 1000;

/// Why a command was refused before execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrecheckError {
    #[error("{command} would return {size} {unit}, limit is {limit} {unit}")]
    TooLarge {
        command: String,
        size: u64,
        limit: u64,
        unit: &'static str,
    },

    #[error("{0} without COUNT is not allowed")]
    MissingCount(String),

    #[error("invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// What the precheck measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Measurement {
    /// Bytes for string reads, elements for everything else.
    pub size: u64,
    pub is_string: bool,
}

impl Measurement {
    fn elements(size: u64) -> Self {
        Self {
            size,
            is_string: false,
        }
    }

    fn bytes(size: u64) -> Self {
        Self {
            size,
            is_string: true,
        }
    }
}

/// Runs integer-reply commands against the engine being checked.
#[async_trait]
pub trait SizeProbe: Send {
    async fn integer(&mut self, args: &[&str]) -> Result<i64, BackendError>;
}

/// Splits `raw` and prechecks it. See [`precheck_args`].
pub async fn precheck<P: SizeProbe>(raw: &str, probe: &mut P) -> Result<Measurement, BackendError> {
    let args = dbrelay_protocol::split_args(raw).map_err(|e| refuse(CatalogError::from(e)))?;
    precheck_args(&args, probe).await
}

/// Measures what the command in `args` would return and refuses it if
/// that is over the limit. Commands without a size rule pass with a
/// measurement of zero.
pub async fn precheck_args<P: SizeProbe>(
    args: &[String],
    probe: &mut P,
) -> Result<Measurement, BackendError> {
    let keys = catalog::keys_of(args).map_err(refuse)?;
    let name = args[0].to_ascii_lowercase();

    if let Some(cursor_at) = scan_cursor_index(&name) {
        let count = scan_count(&name, args, cursor_at)?;
        return limit_elements(&name, count);
    }
    let Some(&key) = keys.first() else {
        return Ok(Measurement::default());
    };

    match name.as_str() {
        "get" => {
            let len = probe_len(probe, &["STRLEN", key]).await?;
            limit_bytes(&name, len)
        }
        "mget" => {
            let mut total = 0u64;
            for key in &keys {
                total = total.saturating_add(probe_len(probe, &["STRLEN", key]).await?);
            }
            limit_bytes(&name, total)
        }
        "hgetall" | "hkeys" | "hvals" => {
            let len = probe_len(probe, &["HLEN", key]).await?;
            limit_elements(&name, len)
        }
        "lrange" => {
            let start = int_arg(&name, args, 2)?;
            let stop = int_arg(&name, args, 3)?;
            let len = probe_len(probe, &["LLEN", key]).await?;
            limit_elements(&name, lrange_cardinality(len, start, stop))
        }
        "smembers" => {
            let len = probe_len(probe, &["SCARD", key]).await?;
            limit_elements(&name, len)
        }
        "srandmember" => {
            let size = match args.get(2) {
                None => 1,
                Some(_) => {
                    let count = int_arg(&name, args, 2)?;
                    if count < 0 {
                        count.unsigned_abs()
                    } else {
                        let card = probe_len(probe, &["SCARD", key]).await?;
                        (count as u64).min(card)
                    }
                }
            };
            limit_elements(&name, size)
        }
        "zrangebyscore" | "zrevrangebyscore" | "zrangebylex" | "zrevrangebylex" => {
            let by = if name.ends_with("lex") {
                RangeBy::Lex
            } else {
                RangeBy::Score
            };
            let rev = name.starts_with("zrev");
            let size = match limit_count(&name, args, 4)? {
                Some(count) => count,
                None => range_count(probe, key, by, &args[2], &args[3], rev).await?,
            };
            limit_elements(&name, size)
        }
        "zrange" => {
            let size = zrange_size(probe, &name, args, key).await?;
            limit_elements(&name, size)
        }
        "zrevrange" => {
            let start = int_arg(&name, args, 2)?;
            let stop = int_arg(&name, args, 3)?;
            let len = probe_len(probe, &["ZCARD", key]).await?;
            limit_elements(&name, lrange_cardinality(len, start, stop))
        }
        _ => Ok(Measurement::default()),
    }
}

/// Number of elements `LRANGE key start stop` returns on a list of
/// `len` elements. Negative indexes count from the end; out of range
/// indexes are clamped the way the engine clamps them.
pub fn lrange_cardinality(len: u64, start: i64, stop: i64) -> u64 {
    let len = len.min(i64::MAX as u64) as i64;
    let start = if start < 0 { start.saturating_add(len) } else { start }.max(0);
    let stop = if stop < 0 { stop.saturating_add(len) } else { stop };

    if start > stop || start >= len {
        return 0;
    }
    let stop = stop.min(len - 1);
    (stop - start + 1) as u64
}

#[derive(Debug, Clone, Copy)]
enum RangeBy {
    Score,
    Lex,
}

/// `ZRANGE key start stop [BYSCORE|BYLEX] [REV] [LIMIT offset count]`.
async fn zrange_size<P: SizeProbe>(
    probe: &mut P,
    name: &str,
    args: &[String],
    key: &str,
) -> Result<u64, BackendError> {
    let options = &args[4.min(args.len())..];
    let has = |opt: &str| options.iter().any(|a| a.eq_ignore_ascii_case(opt));

    let by = if has("byscore") {
        Some(RangeBy::Score)
    } else if has("bylex") {
        Some(RangeBy::Lex)
    } else {
        None
    };

    match by {
        Some(by) => match limit_count(name, args, 4)? {
            Some(count) => Ok(count),
            None => range_count(probe, key, by, &args[2], &args[3], has("rev")).await,
        },
        None => {
            let start = int_arg(name, args, 2)?;
            let stop = int_arg(name, args, 3)?;
            let len = probe_len(probe, &["ZCARD", key]).await?;
            Ok(lrange_cardinality(len, start, stop))
        }
    }
}

/// Counts the members between `from` and `to`. Reverse forms take the
/// bounds high-first, the count commands low-first.
async fn range_count<P: SizeProbe>(
    probe: &mut P,
    key: &str,
    by: RangeBy,
    from: &str,
    to: &str,
    rev: bool,
) -> Result<u64, BackendError> {
    let (min, max) = if rev { (to, from) } else { (from, to) };
    let counter = match by {
        RangeBy::Score => "ZCOUNT",
        RangeBy::Lex => "ZLEXCOUNT",
    };
    probe_len(probe, &[counter, key, min, max]).await
}

/// The `count` of the `LIMIT offset count` clause among the options
/// starting at `from`. The engine reads options left to right, so a
/// repeated `LIMIT` overrides the earlier ones. A negative count means
/// "all remaining", so it gives no bound.
fn limit_count(name: &str, args: &[String], from: usize) -> Result<Option<u64>, BackendError> {
    let mut count = None;
    let mut i = from;
    while i < args.len() {
        if args[i].eq_ignore_ascii_case("limit") {
            count = Some(int_arg(name, args, i + 2)?);
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(count.and_then(|c| u64::try_from(c).ok()))
}

/// Index of the cursor argument for the scan family.
fn scan_cursor_index(name: &str) -> Option<usize> {
    match name {
        "scan" => Some(1),
        "hscan" | "sscan" | "zscan" => Some(2),
        _ => None,
    }
}

/// The `COUNT` of a scan. Options after the cursor come in pairs
/// (`MATCH pattern`, `COUNT n`, `TYPE type`) plus the `NOVALUES` flag;
/// the last `COUNT` wins.
fn scan_count(name: &str, args: &[String], cursor_at: usize) -> Result<u64, BackendError> {
    let mut count = None;
    let mut i = cursor_at + 1;
    while i < args.len() {
        let opt = args[i].to_ascii_lowercase();
        match opt.as_str() {
            "count" => {
                count = Some(int_arg(name, args, i + 1)?);
                i += 2;
            }
            "match" | "type" => i += 2,
            _ => i += 1,
        }
    }
    let Some(count) = count else {
        return Err(refuse(PrecheckError::MissingCount(name.to_string())));
    };
    u64::try_from(count).map_err(|_| {
        refuse(PrecheckError::InvalidArgument {
            command: name.to_string(),
            reason: format!("COUNT must not be negative, got {count}"),
        })
    })
}

fn int_arg(name: &str, args: &[String], index: usize) -> Result<i64, BackendError> {
    let Some(raw) = args.get(index) else {
        return Err(refuse(PrecheckError::InvalidArgument {
            command: name.to_string(),
            reason: format!("missing argument at position {index}"),
        }));
    };
    raw.parse().map_err(|_| {
        refuse(PrecheckError::InvalidArgument {
            command: name.to_string(),
            reason: format!("'{raw}' is not an integer"),
        })
    })
}

async fn probe_len<P: SizeProbe>(probe: &mut P, args: &[&str]) -> Result<u64, BackendError> {
    let n = probe.integer(args).await?;
    Ok(n.max(0) as u64)
}

fn limit_bytes(name: &str, size: u64) -> Result<Measurement, BackendError> {
    check(name, size, MAX_STRING_BYTES, "bytes").map(|_| Measurement::bytes(size))
}

fn limit_elements(name: &str, size: u64) -> Result<Measurement, BackendError> {
    check(name, size, MAX_ELEMENTS, "elements").map(|_| Measurement::elements(size))
}

fn check(name: &str, size: u64, limit: u64, unit: &'static str) -> Result<(), BackendError> {
    if size > limit {
        return Err(refuse(PrecheckError::TooLarge {
            command: name.to_string(),
            size,
            limit,
            unit,
        }));
    }
    Ok(())
}

fn refuse(e: impl Into<PrecheckError>) -> BackendError {
    BackendError::Refused(e.into())
}
