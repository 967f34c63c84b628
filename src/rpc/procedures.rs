// SPDX-License-Identifier: GPL-3.0-or-later

//! The RPC procedure table (spec §6 "Procedure names used by the remote
//! client"). Each procedure is a plain function over an [`RpcContext`]
//! returning the TSV output pairs or a [`KtError`] the dispatcher maps to
//! an HTTP status (spec §4.5's RV table).

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use super::RpcContext;
use crate::error::KtError;
use crate::kv::CursorStep;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

type Outputs = Vec<(String, Vec<u8>)>;

fn no_outputs() -> Outputs {
    Vec::new()
}

fn require<'a>(ctx: &'a RpcContext, name: &str) -> Result<&'a [u8], KtError> {
    ctx.params.get(name).map(Vec::as_slice).ok_or_else(|| KtError::Protocol(format!("missing parameter: {name}")))
}

fn optional<'a>(ctx: &'a RpcContext, name: &str) -> Option<&'a [u8]> {
    ctx.params.get(name).map(Vec::as_slice)
}

fn require_str<'a>(ctx: &'a RpcContext, name: &str) -> Result<&'a str, KtError> {
    std::str::from_utf8(require(ctx, name)?).map_err(|_| KtError::Protocol(format!("parameter {name} is not valid UTF-8")))
}

fn parse_num<T: std::str::FromStr>(ctx: &RpcContext, name: &str) -> Result<T, KtError> {
    require_str(ctx, name)?.parse().map_err(|_| KtError::Protocol(format!("parameter {name} is not numeric")))
}

fn parse_num_opt<T: std::str::FromStr>(ctx: &RpcContext, name: &str) -> Result<Option<T>, KtError> {
    match ctx.params.get(name) {
        None => Ok(None),
        Some(raw) => {
            let text = std::str::from_utf8(raw)
                .map_err(|_| KtError::Protocol(format!("parameter {name} is not valid UTF-8")))?;
            text.parse().map(Some).map_err(|_| KtError::Protocol(format!("parameter {name} is not numeric")))
        },
    }
}

/// Expiration, given as seconds-from-now in the `xt` parameter (spec §3
/// leaves the wire representation open; the remote client and the binary
/// bulk framer both treat it as a relative TTL, so RPC matches them).
fn expiry(ctx: &RpcContext) -> Result<Option<Duration>, KtError> {
    match parse_num_opt::<f64>(ctx, "xt")? {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(_) => Err(KtError::Protocol("xt must be a non-negative number".into())),
        None => Ok(None),
    }
}

const BULK_RESERVED: &[&str] = &["xt", "DB", "atomic"];

pub fn report(ctx: &RpcContext) -> Result<Outputs, KtError> {
    Ok(vec![
        ("version".into(), env!("CARGO_PKG_VERSION").as_bytes().to_vec()),
        ("count".into(), ctx.db.count().to_string().into_bytes()),
        ("size".into(), ctx.db.size().to_string().into_bytes()),
    ])
}

/// Mirrors `ktremotedb.h`'s `status()` (spec §4.11): record counters plus
/// process uptime. Worker-pool size is a `ThreadedServer` property this
/// context has no handle to, so it is omitted rather than faked.
pub fn status(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let mut outputs = report(ctx)?;
    outputs.push(("uptime".into(), PROCESS_START.elapsed().as_secs_f64().to_string().into_bytes()));
    Ok(outputs)
}

pub fn clear(ctx: &RpcContext) -> Result<Outputs, KtError> {
    ctx.db.clear()?;
    Ok(no_outputs())
}

pub fn synchronize(ctx: &RpcContext) -> Result<Outputs, KtError> {
    ctx.db.synchronize()?;
    Ok(no_outputs())
}

pub fn set(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let value = require(ctx, "value")?;
    ctx.db.set(key, value, expiry(ctx)?)?;
    Ok(no_outputs())
}

pub fn add(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let value = require(ctx, "value")?;
    ctx.db.add(key, value, expiry(ctx)?)?;
    Ok(no_outputs())
}

pub fn replace(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let value = require(ctx, "value")?;
    ctx.db.replace(key, value, expiry(ctx)?)?;
    Ok(no_outputs())
}

pub fn append(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let value = require(ctx, "value")?;
    ctx.db.append(key, value, expiry(ctx)?)?;
    Ok(no_outputs())
}

pub fn increment(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let delta: i64 = parse_num(ctx, "num")?;
    let result = ctx.db.increment(key, delta, expiry(ctx)?)?;
    Ok(vec![("num".into(), result.to_string().into_bytes())])
}

pub fn increment_double(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let delta: f64 = parse_num(ctx, "num")?;
    let result = ctx.db.increment_double(key, delta, expiry(ctx)?)?;
    Ok(vec![("num".into(), result.to_string().into_bytes())])
}

pub fn cas(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let key = require(ctx, "key")?;
    let oval = optional(ctx, "oval");
    let nval = optional(ctx, "nval");
    ctx.db.cas(key, oval, nval)?;
    Ok(no_outputs())
}

pub fn remove(ctx: &RpcContext) -> Result<Outputs, KtError> {
    ctx.db.remove(require(ctx, "key")?)?;
    Ok(no_outputs())
}

pub fn get(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let value = ctx.db.get(require(ctx, "key")?)?;
    Ok(vec![("value".into(), value)])
}

pub fn check(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let size = ctx.db.check(require(ctx, "key")?)?;
    Ok(vec![("vsiz".into(), size.to_string().into_bytes())])
}

pub fn seize(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let value = ctx.db.seize(require(ctx, "key")?)?;
    Ok(vec![("value".into(), value)])
}

fn bulk_records(ctx: &RpcContext) -> impl Iterator<Item = (&str, &[u8])> {
    ctx.params
        .iter()
        .filter(|(k, _)| !BULK_RESERVED.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_slice()))
}

pub fn set_bulk(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let xt = expiry(ctx)?;
    let mut count = 0u64;
    for (key, value) in bulk_records(ctx) {
        ctx.db.set(key.as_bytes(), value, xt)?;
        count += 1;
    }
    Ok(vec![("num".into(), count.to_string().into_bytes())])
}

pub fn remove_bulk(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let mut count = 0u64;
    for (key, _) in bulk_records(ctx) {
        if ctx.db.remove(key.as_bytes()).is_ok() {
            count += 1;
        }
    }
    Ok(vec![("num".into(), count.to_string().into_bytes())])
}

pub fn get_bulk(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let mut outputs = Vec::new();
    let mut count = 0u64;
    for (key, _) in bulk_records(ctx) {
        if let Ok(value) = ctx.db.get(key.as_bytes()) {
            outputs.push((key.to_string(), value));
            count += 1;
        }
    }
    outputs.push(("num".into(), count.to_string().into_bytes()));
    Ok(outputs)
}

pub fn vacuum(_ctx: &RpcContext) -> Result<Outputs, KtError> {
    Err(KtError::NotImplemented("vacuum".into()))
}

fn match_outputs(hits: Vec<crate::kv::MatchHit>) -> Outputs {
    let mut outputs: Outputs = hits.into_iter().enumerate().map(|(i, hit)| (i.to_string(), hit.key)).collect();
    outputs.push(("num".into(), outputs.len().to_string().into_bytes()));
    outputs
}

pub fn match_prefix(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let prefix = require(ctx, "prefix")?;
    let max = parse_num_opt::<usize>(ctx, "max")?;
    Ok(match_outputs(ctx.db.match_prefix(prefix, max)))
}

pub fn match_regex(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let pattern = require_str(ctx, "regex")?;
    let max = parse_num_opt::<usize>(ctx, "max")?;
    Ok(match_outputs(ctx.db.match_regex(pattern, max)?))
}

pub fn match_similar(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let origin = require(ctx, "origin")?;
    let distance: u32 = parse_num(ctx, "range")?;
    let max = parse_num_opt::<usize>(ctx, "max")?;
    Ok(match_outputs(ctx.db.match_similar(origin, distance, max)))
}

fn resolve_cursor_id(ctx: &RpcContext) -> Result<u64, KtError> {
    match parse_num_opt::<u64>(ctx, "cur")? {
        Some(id) => Ok(id),
        None => Ok(ctx.cursors.insert(ctx.db.clone().open_cursor())),
    }
}

fn cursor_step_outputs(id: u64, step: CursorStep) -> Result<Outputs, KtError> {
    match step {
        CursorStep::Positioned { key, value } => Ok(vec![
            ("cur".into(), id.to_string().into_bytes()),
            ("key".into(), key),
            ("value".into(), value),
        ]),
        CursorStep::NoRecord => Err(KtError::NoRecord),
    }
}

pub fn cur_jump(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id = resolve_cursor_id(ctx)?;
    let key = optional(ctx, "key");
    let step = ctx.cursors.with_cursor(id, |c| c.jump(key)).ok_or(KtError::NoRecord)?;
    cursor_step_outputs(id, step)
}

pub fn cur_jump_back(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id = resolve_cursor_id(ctx)?;
    let key = optional(ctx, "key");
    let step = ctx.cursors.with_cursor(id, |c| c.jump_back(key)).ok_or(KtError::NoRecord)??;
    cursor_step_outputs(id, step)
}

pub fn cur_step(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let step = ctx.cursors.with_cursor(id, |c| c.step()).ok_or(KtError::NoRecord)?;
    cursor_step_outputs(id, step)
}

pub fn cur_step_back(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let step = ctx.cursors.with_cursor(id, |c| c.step_back()).ok_or(KtError::NoRecord)??;
    cursor_step_outputs(id, step)
}

pub fn cur_set_value(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let value = require(ctx, "value")?;
    ctx.cursors.with_cursor(id, |c| c.set_value(value)).ok_or(KtError::NoRecord)??;
    Ok(no_outputs())
}

pub fn cur_remove(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    ctx.cursors.with_cursor(id, |c| c.remove()).ok_or(KtError::NoRecord)??;
    Ok(no_outputs())
}

pub fn cur_get_key(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let key = ctx.cursors.with_cursor(id, |c| c.get_key()).ok_or(KtError::NoRecord)?.ok_or(KtError::NoRecord)?;
    Ok(vec![("key".into(), key)])
}

pub fn cur_get_value(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let value =
        ctx.cursors.with_cursor(id, |c| c.get_value()).ok_or(KtError::NoRecord)?.ok_or(KtError::NoRecord)?;
    Ok(vec![("value".into(), value)])
}

pub fn cur_get(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let step = ctx.cursors.with_cursor(id, |c| c.get()).ok_or(KtError::NoRecord)?;
    cursor_step_outputs(id, step)
}

pub fn cur_seize(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    let (key, value) = ctx.cursors.with_cursor(id, |c| c.seize()).ok_or(KtError::NoRecord)??;
    Ok(vec![("key".into(), key), ("value".into(), value)])
}

pub fn cur_delete(ctx: &RpcContext) -> Result<Outputs, KtError> {
    let id: u64 = parse_num(ctx, "cur")?;
    ctx.cursors.remove(id);
    Ok(no_outputs())
}

pub fn play_script(_ctx: &RpcContext) -> Result<Outputs, KtError> {
    Err(KtError::NotImplemented("play_script".into()))
}

pub fn tune_replication(_ctx: &RpcContext) -> Result<Outputs, KtError> {
    Err(KtError::NotImplemented("tune_replication".into()))
}

pub fn ulog_list(_ctx: &RpcContext) -> Result<Outputs, KtError> {
    Err(KtError::NotImplemented("ulog_list".into()))
}

pub fn ulog_remove(_ctx: &RpcContext) -> Result<Outputs, KtError> {
    Err(KtError::NotImplemented("ulog_remove".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::kv::Database;
    use crate::kv::memory::MemoryDatabase;
    use crate::rpc::cursor_table::CursorTable;

    fn ctx_with<'a>(
        db: &'a Arc<dyn Database>,
        cursors: &'a CursorTable,
        params: &[(&str, &str)],
    ) -> RpcContext<'a> {
        let mut map = super::super::params::Params::new();
        for (k, v) in params {
            map.insert((*k).to_string(), v.as_bytes().to_vec());
        }
        RpcContext { db: db.clone(), params: map, cursors }
    }

    #[test]
    fn set_then_get_round_trips() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cursors = CursorTable::new();
        set(&ctx_with(&db, &cursors, &[("key", "a"), ("value", "1")])).unwrap();
        let outputs = get(&ctx_with(&db, &cursors, &[("key", "a")])).unwrap();
        assert_eq!(outputs, vec![("value".to_string(), b"1".to_vec())]);
    }

    #[test]
    fn get_missing_key_is_no_record() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cursors = CursorTable::new();
        let err = get(&ctx_with(&db, &cursors, &[("key", "missing")])).unwrap_err();
        assert!(matches!(err, KtError::NoRecord));
    }

    #[test]
    fn cursor_jump_then_step_then_delete() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cursors = CursorTable::new();
        set(&ctx_with(&db, &cursors, &[("key", "a"), ("value", "1")])).unwrap();
        set(&ctx_with(&db, &cursors, &[("key", "b"), ("value", "2")])).unwrap();

        let outputs = cur_jump(&ctx_with(&db, &cursors, &[])).unwrap();
        let cur_id = String::from_utf8(outputs[0].1.clone()).unwrap();

        let outputs = cur_step(&ctx_with(&db, &cursors, &[("cur", &cur_id)])).unwrap();
        assert_eq!(outputs[2].1, b"2");

        cur_delete(&ctx_with(&db, &cursors, &[("cur", &cur_id)])).unwrap();
        assert!(cursors.is_empty());
    }

    #[test]
    fn set_bulk_ignores_reserved_parameters() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cursors = CursorTable::new();
        let outputs = set_bulk(&ctx_with(&db, &cursors, &[("a", "1"), ("b", "2"), ("xt", "60")])).unwrap();
        assert_eq!(outputs, vec![("num".to_string(), b"2".to_vec())]);
        assert_eq!(db.count(), 2);
    }
}
