//! The closed auxiliary function set (§6 of the specification).
//!
//! Functions are pure: given the same arguments and the same evaluation
//! context they always return the same result. `in_time_range`/
//! `is_weekday` read from the context's `request` namespace rather than the
//! wall clock directly, so evaluation stays deterministic given a context.

use crate::error::{Error, Result};
use crate::policy::value::Value;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Names of every function the compiler will accept a call to. The compiler
/// rejects any `Expr::Call` whose name is not in this set with
/// `Error::FunctionNotDeclared`; the evaluator binds the same names to their
/// implementations in `call`.
pub const DECLARED_FUNCTIONS: &[&str] = &[
    "has_role",
    "has_any_role",
    "has_all_roles",
    "in_time_range",
    "is_weekday",
    "ip_in_range",
    "resource_matches",
    "in_org",
    "is_member_of",
    "days_since",
    "hours_since",
];

pub fn is_declared(name: &str) -> bool {
    DECLARED_FUNCTIONS.contains(&name)
}

/// Invoke a declared function. `principal`/`resource`/`request` give access
/// to the namespaces the function set is specified against; `args` are the
/// already-evaluated call arguments.
pub fn call(name: &str, args: &[Value], principal: &Value, request: &Value) -> Result<Value> {
    match name {
        "has_role" => {
            let role = expect_string_arg(name, args, 0)?;
            Ok(Value::Bool(roles_of(principal).contains(&role)))
        }
        "has_any_role" => {
            let wanted = expect_string_list_arg(name, args, 0)?;
            let roles = roles_of(principal);
            Ok(Value::Bool(wanted.iter().any(|r| roles.contains(r))))
        }
        "has_all_roles" => {
            let wanted = expect_string_list_arg(name, args, 0)?;
            let roles = roles_of(principal);
            Ok(Value::Bool(wanted.iter().all(|r| roles.contains(r))))
        }
        "in_time_range" => {
            let start = expect_string_arg(name, args, 0)?;
            let end = expect_string_arg(name, args, 1)?;
            let hour = field_int(request, "hour")?;
            Ok(Value::Bool(hour_in_range(hour, &start, &end)))
        }
        "is_weekday" => Ok(Value::Bool(field_bool(request, "is_weekday").unwrap_or(false))),
        "ip_in_range" => {
            let cidrs = expect_string_list_arg(name, args, 0)?;
            let ip = field_str(request, "ip").unwrap_or_default();
            Ok(Value::Bool(cidrs.iter().any(|cidr| ip_in_cidr(&ip, cidr))))
        }
        "resource_matches" => {
            let glob = expect_string_arg(name, args, 0)?;
            let path = field_str(request, "path").unwrap_or_default();
            Ok(Value::Bool(glob_match(&glob, &path)))
        }
        "in_org" => {
            let org = expect_string_arg(name, args, 0)?;
            Ok(Value::Bool(field_str(principal, "org_id").map(|v| v == org).unwrap_or(false)))
        }
        "is_member_of" => {
            let group = expect_string_arg(name, args, 0)?;
            let groups = field_list(principal, "groups");
            Ok(Value::Bool(groups.iter().any(|g| g.as_str() == Some(group.as_str()))))
        }
        "days_since" => {
            let ts = expect_timestamp_arg(name, args, 0)?;
            Ok(Value::Int((Utc::now() - ts).num_days()))
        }
        "hours_since" => {
            let ts = expect_timestamp_arg(name, args, 0)?;
            Ok(Value::Int((Utc::now() - ts).num_hours()))
        }
        other => Err(Error::FunctionNotDeclared(other.to_string())),
    }
}

fn roles_of(principal: &Value) -> HashSet<String> {
    field_list(principal, "roles")
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn field_str(map: &Value, key: &str) -> Option<String> {
    match map {
        Value::Map(m) => m.get(key).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn field_bool(map: &Value, key: &str) -> Option<bool> {
    match map {
        Value::Map(m) => m.get(key).and_then(Value::as_bool),
        _ => None,
    }
}

fn field_int(map: &Value, key: &str) -> Result<i64> {
    match map {
        Value::Map(m) => m
            .get(key)
            .and_then(Value::as_int)
            .ok_or_else(|| Error::PolicyTypeError(format!("request.{key} is not an integer"))),
        _ => Err(Error::PolicyTypeError("request is not a map".into())),
    }
}

fn field_list<'a>(map: &'a Value, key: &str) -> Vec<&'a Value> {
    match map {
        Value::Map(m) => m.get(key).and_then(Value::as_list).unwrap_or(&[]).iter().collect(),
        _ => Vec::new(),
    }
}

fn expect_string_arg(fn_name: &str, args: &[Value], index: usize) -> Result<String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::PolicyTypeError(format!("{fn_name}: argument {index} must be a string")))
}

fn expect_string_list_arg(fn_name: &str, args: &[Value], index: usize) -> Result<Vec<String>> {
    let list = args
        .get(index)
        .and_then(Value::as_list)
        .ok_or_else(|| Error::PolicyTypeError(format!("{fn_name}: argument {index} must be a list")))?;
    Ok(list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

fn expect_timestamp_arg(fn_name: &str, args: &[Value], index: usize) -> Result<DateTime<Utc>> {
    args.get(index)
        .and_then(Value::as_timestamp)
        .ok_or_else(|| Error::PolicyTypeError(format!("{fn_name}: argument {index} must be a timestamp")))
}

fn hour_in_range(hour: i64, start_hhmm: &str, end_hhmm: &str) -> bool {
    let parse = |hhmm: &str| -> Option<i64> {
        let (h, _m) = hhmm.split_once(':')?;
        h.parse().ok()
    };
    match (parse(start_hhmm), parse(end_hhmm)) {
        (Some(start), Some(end)) if start <= end => hour >= start && hour < end,
        (Some(start), Some(end)) => hour >= start || hour < end,
        _ => false,
    }
}

/// Minimal dotted-quad CIDR containment check (no IPv6); sufficient for the
/// `request.ip` shape fixed by the context schema.
fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let Some((network, prefix_str)) = cidr.split_once('/') else {
        return ip == cidr;
    };
    let Ok(prefix) = prefix_str.parse::<u32>() else {
        return false;
    };
    let (Some(ip_bits), Some(net_bits)) = (to_u32(ip), to_u32(network)) else {
        return false;
    };
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix.min(32));
    (ip_bits & mask) == (net_bits & mask)
}

fn to_u32(addr: &str) -> Option<u32> {
    let parts: Vec<u32> = addr.split('.').filter_map(|p| p.parse().ok()).collect();
    if parts.len() != 4 {
        return None;
    }
    Some((parts[0] << 24) | (parts[1] << 16) | (parts[2] << 8) | parts[3])
}

/// `*`-only glob match against a resource path.
fn glob_match(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*').peekable();
    let mut rest = value;

    if let Some(first) = parts.peek() {
        if !pattern.starts_with('*') {
            if !rest.starts_with(first.as_str()) {
                return false;
            }
            rest = &rest[first.len()..];
            parts.next();
        }
    }

    for part in parts {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    pattern.ends_with('*') || rest.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn principal_with_roles(roles: &[&str]) -> Value {
        let mut map = HashMap::new();
        map.insert(
            "roles".to_string(),
            Value::List(roles.iter().map(|r| Value::String(r.to_string())).collect()),
        );
        Value::Map(map)
    }

    #[test]
    fn has_role_checks_membership() {
        let principal = principal_with_roles(&["admin", "auditor"]);
        let request = Value::Map(HashMap::new());
        let result = call("has_role", &[Value::String("admin".into())], &principal, &request).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn undeclared_function_is_rejected() {
        assert!(!is_declared("shell_exec"));
    }

    #[test]
    fn glob_match_handles_prefix_and_wildcard() {
        assert!(glob_match("/api/*", "/api/users/42"));
        assert!(!glob_match("/api/*", "/admin/users"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn ip_in_cidr_respects_prefix_length() {
        assert!(ip_in_cidr("10.0.0.5", "10.0.0.0/24"));
        assert!(!ip_in_cidr("10.0.1.5", "10.0.0.0/24"));
    }
}
