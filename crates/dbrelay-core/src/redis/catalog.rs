//! Cache-engine command catalog.
//!
//! One entry per command name with the metadata the engine itself
//! reports through `COMMAND INFO`: arity, flags and where the keys sit
//! in the argument list. The precheck engine relies on the key
//! positions to measure values before a command runs, so a wrong entry
//! here silently lets an oversized reply through.
//!
//! Arity counts the command name itself. A negative arity means "at
//! least `|arity|` arguments". A negative `last_key` is counted from
//! the end of the argument list (`-1` is the last argument).
//!
//! The table is built once (see [`init`]) and only read afterwards.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::OnceLock;

use dbrelay_protocol::{split_args, ProtocolError};
use thiserror::Error;

use crate::backend::CommandKind;

/// Command flag bit set.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdFlags(u8);

impl CmdFlags {
    pub const NONE: CmdFlags = CmdFlags(0);
    pub const ADMIN: CmdFlags = CmdFlags(1);
    pub const WRITE: CmdFlags = CmdFlags(1 << 1);
    pub const READONLY: CmdFlags = CmdFlags(1 << 2);

    pub const fn contains(self, other: CmdFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CmdFlags {
    type Output = CmdFlags;

    fn bitor(self, rhs: CmdFlags) -> CmdFlags {
        CmdFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for CmdFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(CmdFlags::ADMIN) {
            names.push("admin");
        }
        if self.contains(CmdFlags::WRITE) {
            names.push("write");
        }
        if self.contains(CmdFlags::READONLY) {
            names.push("readonly");
        }
        write!(f, "[{}]", names.join(", "))
    }
}

/// Static metadata for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisCmdMeta {
    pub name: &'static str,
    pub arity: i32,
    pub flags: CmdFlags,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
}

impl RedisCmdMeta {
    pub fn is_admin(&self) -> bool {
        self.flags.contains(CmdFlags::ADMIN)
    }

    pub fn is_write(&self) -> bool {
        self.flags.contains(CmdFlags::WRITE)
    }

    /// Whether `argc` arguments (command name included) satisfy the arity.
    pub fn arity_matches(&self, argc: usize) -> bool {
        let required = self.arity.unsigned_abs() as usize;
        if self.arity < 0 {
            argc >= required
        } else {
            argc == required
        }
    }

    /// Query vs execute for the generic dispatch path. Admin commands
    /// are never runnable; writes report an affected count; everything
    /// else (read-only and flag-less commands like `ping`) returns data.
    pub fn kind(&self) -> CommandKind {
        if self.is_admin() {
            CommandKind::Unsupported
        } else if self.is_write() {
            CommandKind::Execute
        } else {
            CommandKind::Query
        }
    }

    /// Picks the key arguments out of `args` (`args[0]` is the command).
    pub fn keys<'a>(&self, args: &'a [String]) -> Result<Vec<&'a str>, CatalogError> {
        if self.is_admin() || self.first_key == 0 {
            return Ok(Vec::new());
        }
        if !self.arity_matches(args.len()) {
            return Err(CatalogError::Arity {
                command: self.name,
                arity: self.arity,
                actual: args.len(),
            });
        }

        let argc = args.len() as i64;
        let first = self.first_key as i64;
        let last = if self.last_key < 0 {
            argc + self.last_key as i64
        } else {
            self.last_key as i64
        };
        let step = self.key_step.max(1) as i64;

        let mut keys = Vec::new();
        let mut i = first;
        while i <= last && i < argc {
            keys.push(args[i as usize].as_str());
            i += step;
        }
        Ok(keys)
    }
}

/// Failures locating the keys of a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("wrong number of arguments for '{command}': expected {}, got {actual}", describe_arity(.arity.clone()))]
    Arity {
        command: &'static str,
        arity: i32,
        actual: usize,
    },

    #[error("cannot split command line: {0}")]
    Split(#[from] ProtocolError),
}

fn describe_arity(arity: i32) -> String {
    if arity < 0 {
        format!("at least {}", arity.unsigned_abs())
    } else {
        arity.to_string()
    }
}

const A: CmdFlags = CmdFlags::ADMIN;
const W: CmdFlags = CmdFlags::WRITE;
const R: CmdFlags = CmdFlags::READONLY;
const N: CmdFlags = CmdFlags::NONE;

const fn cmd(
    name: &'static str,
    arity: i32,
    flags: CmdFlags,
    first_key: i32,
    last_key: i32,
    key_step: i32,
) -> RedisCmdMeta {
    RedisCmdMeta {
        name,
        arity,
        flags,
        first_key,
        last_key,
        key_step,
    }
}

static COMMANDS: &[RedisCmdMeta] = &[
    // strings
    cmd("get", 2, R, 1, 1, 1),
    cmd("set", -3, W, 1, 1, 1),
    cmd("setnx", 3, W, 1, 1, 1),
    cmd("setex", 4, W, 1, 1, 1),
    cmd("psetex", 4, W, 1, 1, 1),
    cmd("getset", 3, W, 1, 1, 1),
    cmd("getdel", 2, W, 1, 1, 1),
    cmd("getex", -2, W, 1, 1, 1),
    cmd("getrange", 4, R, 1, 1, 1),
    cmd("substr", 4, R, 1, 1, 1),
    cmd("setrange", 4, W, 1, 1, 1),
    cmd("append", 3, W, 1, 1, 1),
    cmd("strlen", 2, R, 1, 1, 1),
    cmd("incr", 2, W, 1, 1, 1),
    cmd("decr", 2, W, 1, 1, 1),
    cmd("incrby", 3, W, 1, 1, 1),
    cmd("decrby", 3, W, 1, 1, 1),
    cmd("incrbyfloat", 3, W, 1, 1, 1),
    cmd("mget", -2, R, 1, -1, 1),
    cmd("mset", -3, W, 1, -1, 2),
    cmd("msetnx", -3, W, 1, -1, 2),
    cmd("lcs", -3, R, 1, 2, 1),
    cmd("setbit", 4, W, 1, 1, 1),
    cmd("getbit", 3, R, 1, 1, 1),
    cmd("bitcount", -2, R, 1, 1, 1),
    cmd("bitpos", -3, R, 1, 1, 1),
    cmd("bitop", -4, W, 2, -1, 1),
    cmd("bitfield", -2, W, 1, 1, 1),
    cmd("bitfield_ro", -2, R, 1, 1, 1),
    // keyspace
    cmd("del", -2, W, 1, -1, 1),
    cmd("unlink", -2, W, 1, -1, 1),
    cmd("exists", -2, R, 1, -1, 1),
    cmd("type", 2, R, 1, 1, 1),
    cmd("ttl", 2, R, 1, 1, 1),
    cmd("pttl", 2, R, 1, 1, 1),
    cmd("expiretime", 2, R, 1, 1, 1),
    cmd("pexpiretime", 2, R, 1, 1, 1),
    cmd("expire", -3, W, 1, 1, 1),
    cmd("pexpire", -3, W, 1, 1, 1),
    cmd("expireat", -3, W, 1, 1, 1),
    cmd("pexpireat", -3, W, 1, 1, 1),
    cmd("persist", 2, W, 1, 1, 1),
    cmd("rename", 3, W, 1, 2, 1),
    cmd("renamenx", 3, W, 1, 2, 1),
    cmd("copy", -3, W, 1, 2, 1),
    cmd("move", 3, W, 1, 1, 1),
    cmd("dump", 2, R, 1, 1, 1),
    cmd("restore", -4, W, 1, 1, 1),
    cmd("touch", -2, R, 1, -1, 1),
    cmd("object", -2, R, 2, 2, 1),
    cmd("sort", -2, W, 1, 1, 1),
    cmd("sort_ro", -2, R, 1, 1, 1),
    cmd("keys", 2, R, 0, 0, 0),
    cmd("scan", -2, R, 0, 0, 0),
    cmd("randomkey", 1, R, 0, 0, 0),
    cmd("dbsize", 1, R, 0, 0, 0),
    cmd("memory", -2, R, 0, 0, 0),
    cmd("swapdb", 3, W, 0, 0, 0),
    cmd("flushdb", -1, W, 0, 0, 0),
    cmd("flushall", -1, W, 0, 0, 0),
    cmd("wait", 3, N, 0, 0, 0),
    // hashes
    cmd("hget", 3, R, 1, 1, 1),
    cmd("hset", -4, W, 1, 1, 1),
    cmd("hsetnx", 4, W, 1, 1, 1),
    cmd("hmset", -4, W, 1, 1, 1),
    cmd("hmget", -3, R, 1, 1, 1),
    cmd("hdel", -3, W, 1, 1, 1),
    cmd("hlen", 2, R, 1, 1, 1),
    cmd("hstrlen", 3, R, 1, 1, 1),
    cmd("hexists", 3, R, 1, 1, 1),
    cmd("hkeys", 2, R, 1, 1, 1),
    cmd("hvals", 2, R, 1, 1, 1),
    cmd("hgetall", 2, R, 1, 1, 1),
    cmd("hincrby", 4, W, 1, 1, 1),
    cmd("hincrbyfloat", 4, W, 1, 1, 1),
    cmd("hrandfield", -2, R, 1, 1, 1),
    cmd("hscan", -3, R, 1, 1, 1),
    // lists
    cmd("lpush", -3, W, 1, 1, 1),
    cmd("rpush", -3, W, 1, 1, 1),
    cmd("lpushx", -3, W, 1, 1, 1),
    cmd("rpushx", -3, W, 1, 1, 1),
    cmd("lpop", -2, W, 1, 1, 1),
    cmd("rpop", -2, W, 1, 1, 1),
    cmd("llen", 2, R, 1, 1, 1),
    cmd("lindex", 3, R, 1, 1, 1),
    cmd("lset", 4, W, 1, 1, 1),
    cmd("lrange", 4, R, 1, 1, 1),
    cmd("ltrim", 4, W, 1, 1, 1),
    cmd("lrem", 4, W, 1, 1, 1),
    cmd("linsert", 5, W, 1, 1, 1),
    cmd("lpos", -3, R, 1, 1, 1),
    cmd("rpoplpush", 3, W, 1, 2, 1),
    cmd("lmove", 5, W, 1, 2, 1),
    cmd("blpop", -3, W, 1, -2, 1),
    cmd("brpop", -3, W, 1, -2, 1),
    cmd("brpoplpush", 4, W, 1, 2, 1),
    cmd("blmove", 6, W, 1, 2, 1),
    cmd("lmpop", -4, W, 0, 0, 0),
    cmd("blmpop", -5, W, 0, 0, 0),
    // sets
    cmd("sadd", -3, W, 1, 1, 1),
    cmd("srem", -3, W, 1, 1, 1),
    cmd("spop", -2, W, 1, 1, 1),
    cmd("srandmember", -2, R, 1, 1, 1),
    cmd("smembers", 2, R, 1, 1, 1),
    cmd("sismember", 3, R, 1, 1, 1),
    cmd("smismember", -3, R, 1, 1, 1),
    cmd("scard", 2, R, 1, 1, 1),
    cmd("smove", 4, W, 1, 2, 1),
    cmd("sinter", -2, R, 1, -1, 1),
    cmd("sintercard", -3, R, 0, 0, 0),
    cmd("sinterstore", -3, W, 1, -1, 1),
    cmd("sunion", -2, R, 1, -1, 1),
    cmd("sunionstore", -3, W, 1, -1, 1),
    cmd("sdiff", -2, R, 1, -1, 1),
    cmd("sdiffstore", -3, W, 1, -1, 1),
    cmd("sscan", -3, R, 1, 1, 1),
    // sorted sets
    cmd("zadd", -4, W, 1, 1, 1),
    cmd("zincrby", 4, W, 1, 1, 1),
    cmd("zrem", -3, W, 1, 1, 1),
    cmd("zcard", 2, R, 1, 1, 1),
    cmd("zcount", 4, R, 1, 1, 1),
    cmd("zlexcount", 4, R, 1, 1, 1),
    cmd("zscore", 3, R, 1, 1, 1),
    cmd("zmscore", -3, R, 1, 1, 1),
    cmd("zrank", -3, R, 1, 1, 1),
    cmd("zrevrank", -3, R, 1, 1, 1),
    cmd("zrange", -4, R, 1, 1, 1),
    cmd("zrevrange", -4, R, 1, 1, 1),
    cmd("zrangebyscore", -4, R, 1, 1, 1),
    cmd("zrevrangebyscore", -4, R, 1, 1, 1),
    cmd("zrangebylex", -4, R, 1, 1, 1),
    cmd("zrevrangebylex", -4, R, 1, 1, 1),
    cmd("zrangestore", -5, W, 1, 2, 1),
    cmd("zremrangebyrank", 4, W, 1, 1, 1),
    cmd("zremrangebyscore", 4, W, 1, 1, 1),
    cmd("zremrangebylex", 4, W, 1, 1, 1),
    cmd("zpopmin", -2, W, 1, 1, 1),
    cmd("zpopmax", -2, W, 1, 1, 1),
    cmd("bzpopmin", -3, W, 1, -2, 1),
    cmd("bzpopmax", -3, W, 1, -2, 1),
    cmd("zrandmember", -2, R, 1, 1, 1),
    cmd("zunionstore", -4, W, 0, 0, 0),
    cmd("zinterstore", -4, W, 0, 0, 0),
    cmd("zdiffstore", -4, W, 1, 1, 1),
    cmd("zunion", -3, R, 0, 0, 0),
    cmd("zinter", -3, R, 0, 0, 0),
    cmd("zdiff", -3, R, 0, 0, 0),
    cmd("zintercard", -3, R, 0, 0, 0),
    cmd("zmpop", -4, W, 0, 0, 0),
    cmd("bzmpop", -5, W, 0, 0, 0),
    cmd("zscan", -3, R, 1, 1, 1),
    // hyperloglog
    cmd("pfadd", -2, W, 1, 1, 1),
    cmd("pfcount", -2, R, 1, -1, 1),
    cmd("pfmerge", -2, W, 1, -1, 1),
    // geo
    cmd("geoadd", -5, W, 1, 1, 1),
    cmd("geodist", -4, R, 1, 1, 1),
    cmd("geohash", -2, R, 1, 1, 1),
    cmd("geopos", -2, R, 1, 1, 1),
    cmd("georadius", -6, W, 1, 1, 1),
    cmd("georadius_ro", -6, R, 1, 1, 1),
    cmd("georadiusbymember", -5, W, 1, 1, 1),
    cmd("georadiusbymember_ro", -5, R, 1, 1, 1),
    cmd("geosearch", -7, R, 1, 1, 1),
    cmd("geosearchstore", -8, W, 1, 2, 1),
    // streams
    cmd("xadd", -5, W, 1, 1, 1),
    cmd("xlen", 2, R, 1, 1, 1),
    cmd("xrange", -4, R, 1, 1, 1),
    cmd("xrevrange", -4, R, 1, 1, 1),
    cmd("xdel", -3, W, 1, 1, 1),
    cmd("xtrim", -4, W, 1, 1, 1),
    cmd("xread", -4, R, 0, 0, 0),
    cmd("xreadgroup", -7, W, 0, 0, 0),
    cmd("xgroup", -2, W, 2, 2, 1),
    cmd("xack", -4, W, 1, 1, 1),
    cmd("xpending", -3, R, 1, 1, 1),
    cmd("xclaim", -6, W, 1, 1, 1),
    cmd("xautoclaim", -6, W, 1, 1, 1),
    cmd("xinfo", -2, R, 2, 2, 1),
    cmd("xsetid", -3, W, 1, 1, 1),
    // transactions
    cmd("multi", 1, N, 0, 0, 0),
    cmd("exec", 1, N, 0, 0, 0),
    cmd("discard", 1, N, 0, 0, 0),
    cmd("watch", -2, N, 1, -1, 1),
    cmd("unwatch", 1, N, 0, 0, 0),
    // connection and server introspection
    cmd("ping", -1, N, 0, 0, 0),
    cmd("echo", 2, N, 0, 0, 0),
    cmd("select", 2, N, 0, 0, 0),
    cmd("info", -1, N, 0, 0, 0),
    cmd("time", 1, N, 0, 0, 0),
    cmd("lastsave", 1, N, 0, 0, 0),
    cmd("role", 1, N, 0, 0, 0),
    cmd("command", -1, N, 0, 0, 0),
    cmd("lolwut", -1, R, 0, 0, 0),
    cmd("publish", 3, N, 0, 0, 0),
    cmd("pubsub", -2, N, 0, 0, 0),
    cmd("readonly", 1, N, 0, 0, 0),
    cmd("readwrite", 1, N, 0, 0, 0),
    // administrative: never run through the generic path
    cmd("auth", -2, A, 0, 0, 0),
    cmd("hello", -1, A, 0, 0, 0),
    cmd("reset", 1, A, 0, 0, 0),
    cmd("client", -2, A, 0, 0, 0),
    cmd("config", -2, A, 0, 0, 0),
    cmd("debug", -2, A, 0, 0, 0),
    cmd("shutdown", -1, A, 0, 0, 0),
    cmd("save", 1, A, 0, 0, 0),
    cmd("bgsave", -1, A, 0, 0, 0),
    cmd("bgrewriteaof", 1, A, 0, 0, 0),
    cmd("slaveof", 3, A, 0, 0, 0),
    cmd("replicaof", 3, A, 0, 0, 0),
    cmd("failover", -1, A, 0, 0, 0),
    cmd("sync", 1, A, 0, 0, 0),
    cmd("psync", -3, A, 0, 0, 0),
    cmd("monitor", 1, A, 0, 0, 0),
    cmd("slowlog", -2, A, 0, 0, 0),
    cmd("latency", -2, A, 0, 0, 0),
    cmd("cluster", -2, A, 0, 0, 0),
    cmd("acl", -2, A, 0, 0, 0),
    cmd("module", -2, A, 0, 0, 0),
    cmd("eval", -3, A, 0, 0, 0),
    cmd("evalsha", -3, A, 0, 0, 0),
    cmd("eval_ro", -3, A, 0, 0, 0),
    cmd("evalsha_ro", -3, A, 0, 0, 0),
    cmd("script", -2, A, 0, 0, 0),
    cmd("function", -2, A, 0, 0, 0),
    cmd("fcall", -3, A, 0, 0, 0),
    cmd("fcall_ro", -3, A, 0, 0, 0),
    cmd("subscribe", -2, A, 0, 0, 0),
    cmd("psubscribe", -2, A, 0, 0, 0),
    cmd("ssubscribe", -2, A, 0, 0, 0),
    cmd("unsubscribe", -1, A, 0, 0, 0),
    cmd("punsubscribe", -1, A, 0, 0, 0),
    cmd("sunsubscribe", -1, A, 0, 0, 0),
];

/// The full catalog, indexed by lowercase command name.
pub fn catalog() -> &'static HashMap<&'static str, &'static RedisCmdMeta> {
    static INDEX: OnceLock<HashMap<&'static str, &'static RedisCmdMeta>> = OnceLock::new();
    INDEX.get_or_init(|| COMMANDS.iter().map(|meta| (meta.name, meta)).collect())
}

/// Builds the catalog index. Call once at startup so the first request
/// doesn't pay for it; later calls are no-ops.
pub fn init() -> usize {
    catalog().len()
}

/// Looks up a command by name, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static RedisCmdMeta> {
    let map = catalog();
    map.get(name)
        .or_else(|| map.get(name.to_ascii_lowercase().as_str()))
        .copied()
}

/// Query/execute/unsupported for a command name. Unknown names are
/// unsupported.
pub fn classify(name: &str) -> CommandKind {
    lookup(name).map_or(CommandKind::Unsupported, RedisCmdMeta::kind)
}

/// Splits a raw command line and returns its key arguments.
pub fn get_keys(raw: &str) -> Result<Vec<String>, CatalogError> {
    let args = split_args(raw)?;
    keys_of(&args).map(|keys| keys.into_iter().map(str::to_string).collect())
}

/// Key arguments of an already split command line.
pub fn keys_of(args: &[String]) -> Result<Vec<&str>, CatalogError> {
    let name = args.first().ok_or(CatalogError::Empty)?;
    let meta = lookup(name).ok_or_else(|| CatalogError::Unknown(name.to_ascii_lowercase()))?;
    meta.keys(args)
}
